//! `EngineConfig`: concurrency caps and failure policy for the execution
//! engine (spec §4.8), TOML-loadable the way the grounding workspace's
//! project config loads.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_parallel_steps: usize,
    pub max_parallel_downloads: usize,
    pub max_parallel_builds: usize,
    pub max_drain_sec: u64,
    pub abort_on_failure: bool,
    /// How long `execute` waits for a `sudo_prompt` response before failing
    /// the plan with `sudo_required` (spec §4.8).
    pub sudo_prompt_timeout_sec: u64,
    /// Interval between `sudo -v` credential refreshes while the plan has
    /// an authenticated sudo session (spec §4.8, §9).
    pub sudo_refresh_interval_sec: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            max_parallel_steps: 4,
            max_parallel_downloads: 2,
            max_parallel_builds: (cpus / 4).max(1),
            max_drain_sec: 30,
            abort_on_failure: false,
            sudo_prompt_timeout_sec: 120,
            sudo_refresh_interval_sec: 60,
        }
    }
}

impl EngineConfig {
    /// Loads config from `path`, returning `Ok(None)` if the file doesn't
    /// exist so callers fall back to `Default::default()`.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = toml::from_str(&raw)?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let c = EngineConfig::default();
        assert_eq!(c.max_parallel_steps, 4);
        assert_eq!(c.max_parallel_downloads, 2);
        assert_eq!(c.max_drain_sec, 30);
        assert!(!c.abort_on_failure);
    }

    #[test]
    fn load_missing_file_returns_none() {
        let missing = Path::new("/nonexistent/engine.toml");
        assert!(EngineConfig::load(missing).unwrap().is_none());
    }

    #[test]
    fn load_parses_partial_overrides_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "abort_on_failure = true\n").unwrap();
        let config = EngineConfig::load(&path).unwrap().unwrap();
        assert!(config.abort_on_failure);
        assert_eq!(config.max_parallel_steps, 4);
    }
}
