//! Choice Resolver (spec §2 component D, §4.3): resolves each recipe
//! `Choice` into concrete, enabled/disabled-annotated options, and applies
//! the value precedence rule (`answer > default > first enabled`).
//!
//! Dynamic choices (`source: dynamic`) are fetched over HTTP and cached
//! with a TTL; a stale cache entry is served if the refetch fails, so a
//! flaky registry degrades the choice list instead of failing resolution
//! outright (spec §9: "own global caches in a single actor with explicit
//! TTL").

use std::collections::HashMap;
use std::time::{Duration, Instant};

use installer_core::types::{Choice, ChoiceKind, ChoiceOption, ChoiceSource, ChoiceValue, SystemProfile};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum ChoiceError {
    #[error("no available option for choice {choice_id}")]
    NoAvailableOption { choice_id: String },
    #[error("fetch failed for choice {choice_id}: {message}")]
    FetchFailed { choice_id: String, message: String },
}

/// One option after profile-requirement filtering: still present even when
/// disabled, carrying the reason (spec §4.3: "disabled options are never
/// removed from the list, only annotated").
#[derive(Debug, Clone)]
pub struct ResolvedOption {
    pub id: String,
    pub label: String,
    pub enabled: bool,
    pub disabled_reason: Option<String>,
    pub enable_hint: Option<String>,
    pub default: bool,
}

struct CacheEntry {
    fetched_at: Instant,
    options: Vec<ResolvedOption>,
}

/// Owns the dynamic-choice HTTP cache. One instance per resolution session
/// (or long-lived, shared across resolutions — the cache is keyed by
/// choice id plus fetch URL so stale entries from one recipe never leak
/// into another).
pub struct ChoiceResolver {
    client: reqwest::Client,
    cache: Mutex<HashMap<String, CacheEntry>>,
}

impl Default for ChoiceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceResolver {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    fn filter_static(choice: &Choice, profile: &SystemProfile) -> Vec<ResolvedOption> {
        let profile_json = serde_json::to_value(profile).unwrap_or(serde_json::Value::Null);
        choice
            .options
            .iter()
            .map(|opt| Self::resolve_static_option(opt, &profile_json))
            .collect()
    }

    fn resolve_static_option(opt: &ChoiceOption, profile_json: &serde_json::Value) -> ResolvedOption {
        let enabled = match &opt.requires {
            Some(cond) => installer_condition::evaluate(cond, profile_json),
            None => true,
        };
        ResolvedOption {
            id: opt.id.clone(),
            label: opt.label.clone(),
            enabled,
            disabled_reason: if enabled { None } else { opt.disabled_reason.clone() },
            enable_hint: if enabled { None } else { opt.enable_hint.clone() },
            default: opt.default,
        }
    }

    /// Fetches and parses a dynamic choice's option list, using the cached
    /// value (even if stale) when the refetch fails.
    async fn fetch_dynamic(&self, choice: &Choice) -> Result<Vec<ResolvedOption>, ChoiceError> {
        let url = choice.fetch_url.as_deref().ok_or_else(|| ChoiceError::FetchFailed {
            choice_id: choice.id.clone(),
            message: "dynamic choice missing fetch_url".into(),
        })?;
        let cache_key = format!("{}::{}", choice.id, url);
        let ttl = Duration::from_secs(choice.cache_ttl.unwrap_or(3600));

        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&cache_key) {
                if entry.fetched_at.elapsed() < ttl {
                    return Ok(entry.options.clone());
                }
            }
        }

        match self.client.get(url).send().await {
            Ok(resp) => match resp.text().await {
                Ok(body) => {
                    let options = Self::parse_dynamic_body(choice, &body);
                    let mut cache = self.cache.lock().await;
                    cache.insert(
                        cache_key,
                        CacheEntry {
                            fetched_at: Instant::now(),
                            options: options.clone(),
                        },
                    );
                    Ok(options)
                }
                Err(e) => self.stale_or_err(choice, &cache_key, e.to_string()).await,
            },
            Err(e) => self.stale_or_err(choice, &cache_key, e.to_string()).await,
        }
    }

    async fn stale_or_err(
        &self,
        choice: &Choice,
        cache_key: &str,
        message: String,
    ) -> Result<Vec<ResolvedOption>, ChoiceError> {
        let cache = self.cache.lock().await;
        if let Some(entry) = cache.get(cache_key) {
            tracing::warn!(choice_id = %choice.id, error = %message, "dynamic choice fetch failed, serving stale cache");
            return Ok(entry.options.clone());
        }
        Err(ChoiceError::FetchFailed {
            choice_id: choice.id.clone(),
            message,
        })
    }

    fn parse_dynamic_body(choice: &Choice, body: &str) -> Vec<ResolvedOption> {
        let pattern = choice.parse.as_deref().unwrap_or(r"(?m)^\S+$");
        let re = match regex::Regex::new(pattern) {
            Ok(re) => re,
            Err(_) => return vec![],
        };
        let mut values: Vec<String> = re
            .find_iter(body)
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if let Some(filter) = &choice.filter {
            if let Ok(filter_re) = regex::Regex::new(filter) {
                values.retain(|v| filter_re.is_match(v));
            }
        }
        if let Some(exclude) = &choice.exclude {
            if let Ok(exclude_re) = regex::Regex::new(exclude) {
                values.retain(|v| !exclude_re.is_match(v));
            }
        }
        if let Some(limit) = choice.limit {
            values.truncate(limit);
        }

        values
            .into_iter()
            .enumerate()
            .map(|(i, v)| ResolvedOption {
                id: v.clone(),
                label: v,
                enabled: true,
                disabled_reason: None,
                enable_hint: None,
                default: i == 0,
            })
            .collect()
    }

    /// Resolves a choice's full option list with enabled/disabled
    /// annotations, per spec §4.3.
    pub async fn resolve_options(
        &self,
        choice: &Choice,
        profile: &SystemProfile,
    ) -> Result<Vec<ResolvedOption>, ChoiceError> {
        match choice.source {
            ChoiceSource::Static => Ok(Self::filter_static(choice, profile)),
            ChoiceSource::Dynamic => self.fetch_dynamic(choice).await,
            ChoiceSource::PackageManager => {
                // Enumerating installed/available package versions requires
                // invoking the host package manager; that belongs to the
                // execution engine's process layer. Here we only filter
                // whatever the caller already queried and passed in as
                // static-shaped options, same as the static path.
                Ok(Self::filter_static(choice, profile))
            }
        }
    }

    /// Applies value precedence: explicit answer, else the recipe default,
    /// else the first enabled option (spec §4.3).
    pub fn pick(
        choice: &Choice,
        options: &[ResolvedOption],
        answer: Option<&ChoiceValue>,
    ) -> Result<ChoiceValue, ChoiceError> {
        let enabled_ids: Vec<&str> = options.iter().filter(|o| o.enabled).map(|o| o.id.as_str()).collect();

        match choice.kind {
            ChoiceKind::Single => {
                if let Some(ChoiceValue::Single(id)) = answer {
                    if enabled_ids.contains(&id.as_str()) {
                        return Ok(ChoiceValue::Single(id.clone()));
                    }
                }
                if let Some(default_id) = options.iter().find(|o| o.enabled && o.default).map(|o| o.id.clone()) {
                    return Ok(ChoiceValue::Single(default_id));
                }
                enabled_ids
                    .first()
                    .map(|id| ChoiceValue::Single(id.to_string()))
                    .ok_or_else(|| ChoiceError::NoAvailableOption {
                        choice_id: choice.id.clone(),
                    })
            }
            ChoiceKind::Multi => {
                if let Some(ChoiceValue::Multi(ids)) = answer {
                    let filtered: Vec<String> = ids
                        .iter()
                        .filter(|id| enabled_ids.contains(&id.as_str()))
                        .cloned()
                        .collect();
                    if !filtered.is_empty() {
                        return Ok(ChoiceValue::Multi(filtered));
                    }
                }
                let defaults: Vec<String> = options
                    .iter()
                    .filter(|o| o.enabled && o.default)
                    .map(|o| o.id.clone())
                    .collect();
                if !defaults.is_empty() {
                    return Ok(ChoiceValue::Multi(defaults));
                }
                if enabled_ids.is_empty() {
                    return Err(ChoiceError::NoAvailableOption {
                        choice_id: choice.id.clone(),
                    });
                }
                Ok(ChoiceValue::Multi(vec![enabled_ids[0].to_string()]))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_core::types::*;

    fn profile() -> SystemProfile {
        SystemProfile {
            system: "linux".into(),
            arch: "x86_64".into(),
            distro: Distro {
                id: "debian".into(),
                family: "debian".into(),
                version: "12".into(),
                version_tuple: vec![12],
                codename: Some("bookworm".into()),
            },
            package_manager: PackageManagerInfo {
                primary: "apt".into(),
                available: vec!["apt".into()],
                snap_available: false,
            },
            capabilities: Capabilities::default(),
            libc: None,
            libraries: vec![],
            hardware: None,
            gpu: None,
            kernel: None,
            build_toolchain: None,
            init_system: None,
            network: None,
            python: None,
        }
    }

    fn static_choice() -> Choice {
        Choice {
            id: "variant".into(),
            kind: ChoiceKind::Single,
            label: "Variant".into(),
            source: ChoiceSource::Static,
            options: vec![
                ChoiceOption {
                    id: "cpu".into(),
                    label: "CPU-only".into(),
                    default: true,
                    ..Default::default()
                },
                ChoiceOption {
                    id: "cuda".into(),
                    label: "CUDA".into(),
                    default: false,
                    requires: Some(serde_json::json!({"gpu.nvidia.present": true})),
                    ..Default::default()
                },
            ],
            fetch_url: None,
            parse: None,
            filter: None,
            exclude: None,
            limit: None,
            cache_ttl: None,
        }
    }

    #[tokio::test]
    async fn disabled_options_stay_in_the_list() {
        let resolver = ChoiceResolver::new();
        let options = resolver.resolve_options(&static_choice(), &profile()).await.unwrap();
        assert_eq!(options.len(), 2);
        assert!(options.iter().find(|o| o.id == "cuda").unwrap().enabled == false);
    }

    #[tokio::test]
    async fn pick_uses_default_when_no_answer() {
        let resolver = ChoiceResolver::new();
        let choice = static_choice();
        let options = resolver.resolve_options(&choice, &profile()).await.unwrap();
        let picked = ChoiceResolver::pick(&choice, &options, None).unwrap();
        assert_eq!(picked, ChoiceValue::Single("cpu".into()));
    }

    #[tokio::test]
    async fn pick_rejects_disabled_answer_and_falls_back() {
        let resolver = ChoiceResolver::new();
        let choice = static_choice();
        let options = resolver.resolve_options(&choice, &profile()).await.unwrap();
        let answer = ChoiceValue::Single("cuda".into());
        let picked = ChoiceResolver::pick(&choice, &options, Some(&answer)).unwrap();
        assert_eq!(picked, ChoiceValue::Single("cpu".into()));
    }

    #[test]
    fn parse_dynamic_body_respects_limit_and_filter() {
        let choice = Choice {
            id: "version".into(),
            kind: ChoiceKind::Single,
            label: "Version".into(),
            source: ChoiceSource::Dynamic,
            options: vec![],
            fetch_url: Some("https://example.com/tags".into()),
            parse: Some(r"v\d+\.\d+\.\d+".into()),
            filter: None,
            exclude: Some(r"-rc".into()),
            limit: Some(2),
            cache_ttl: Some(60),
        };
        let body = "v1.0.0\nv1.1.0-rc\nv1.2.0\nv1.3.0\n";
        let options = ChoiceResolver::parse_dynamic_body(&choice, body);
        assert_eq!(options.len(), 2);
        assert!(options.iter().all(|o| !o.id.contains("-rc")));
    }
}
