//! State Store (spec §2 component J, §4.9): persists `PlanState` as one
//! JSON file per tool under `.state/install_plans/`, with atomic
//! tmp-then-rename writes, sensitive-field redaction before the bytes hit
//! disk, and resume semantics that demote any step left `running` from an
//! unclean shutdown back to `pending`.

use std::path::{Path, PathBuf};

use installer_core::types::{PlanState, StepStatus};

const REDACTED: &str = "***REDACTED***";
const SENSITIVE_KEY_MARKERS: &[&str] = &["password", "token", "secret", "credential", "apikey", "api_key"];

fn looks_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEY_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Returns a copy of `state` with sensitive `env_overrides` values masked.
/// The in-memory `PlanState` the engine operates on is never mutated; only
/// the serialized-to-disk copy is redacted (spec §6 persisted state layout).
fn redact_for_disk(state: &PlanState) -> PlanState {
    let mut redacted = state.clone();
    for step in &mut redacted.plan.steps {
        for (key, value) in step.env_overrides.iter_mut() {
            if looks_sensitive(key) {
                *value = REDACTED.to_string();
            }
        }
    }
    for value in redacted.plan.inputs.values_mut() {
        if let Some(obj) = value.as_object_mut() {
            for (key, v) in obj.iter_mut() {
                if looks_sensitive(key) {
                    *v = serde_json::Value::String(REDACTED.to_string());
                }
            }
        }
    }
    redacted
}

pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn plans_dir(&self) -> PathBuf {
        self.root.join("install_plans")
    }

    fn archive_dir(&self) -> PathBuf {
        self.plans_dir().join("archive")
    }

    fn plan_path(&self, tool: &str) -> PathBuf {
        self.plans_dir().join(format!("{tool}.json"))
    }

    /// Writes `state` atomically: serialize to a `.tmp` sibling, then
    /// rename over the final path, so a crash mid-write never leaves a
    /// truncated state file (spec §4.9).
    pub fn save(&self, state: &PlanState) -> anyhow::Result<()> {
        std::fs::create_dir_all(self.plans_dir())?;
        let path = self.plan_path(&state.plan.tool);
        let tmp_path = path.with_extension("json.tmp");
        let redacted = redact_for_disk(state);
        let body = serde_json::to_string_pretty(&redacted)?;
        std::fs::write(&tmp_path, body)?;
        std::fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    /// Loads a tool's persisted state, if any. Any step still marked
    /// `running` is demoted to `pending` (spec §4.9 resume semantics: a
    /// running step at the time of an unclean shutdown cannot be assumed
    /// complete, so it is re-run rather than trusted).
    pub fn load(&self, tool: &str) -> anyhow::Result<Option<PlanState>> {
        let path = self.plan_path(tool);
        if !path.exists() {
            return Ok(None);
        }
        let body = std::fs::read_to_string(&path)?;
        let mut state: PlanState = serde_json::from_str(&body)?;
        let mut demoted_any = false;
        for result in &mut state.results {
            if result.status == StepStatus::Running {
                result.status = StepStatus::Pending;
                demoted_any = true;
            }
        }
        if demoted_any {
            state.interruption_reason = Some("resumed after an unclean shutdown".to_string());
        }
        Ok(Some(state))
    }

    /// Lists tool ids with a pending (non-archived) state file.
    pub fn list_pending(&self) -> anyhow::Result<Vec<String>> {
        let dir = self.plans_dir();
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut tools = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    tools.push(stem.to_string());
                }
            }
        }
        tools.sort();
        Ok(tools)
    }

    /// Moves a tool's state file into `archive/<tool>-<timestamp>.json` and
    /// removes it from the pending set (spec §6).
    pub fn archive(&self, tool: &str, timestamp: chrono::DateTime<chrono::Utc>) -> anyhow::Result<PathBuf> {
        let path = self.plan_path(tool);
        std::fs::create_dir_all(self.archive_dir())?;
        let archived_path = self
            .archive_dir()
            .join(format!("{tool}-{}.json", timestamp.format("%Y%m%dT%H%M%SZ")));
        std::fs::rename(&path, &archived_path)?;
        Ok(archived_path)
    }

    pub fn plans_root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_core::types::*;

    fn sample_state(tool: &str) -> PlanState {
        let plan = Plan {
            plan_id: uuid::Uuid::new_v4(),
            tool: tool.to_string(),
            created_at: chrono::Utc::now(),
            steps: vec![Step {
                id: "s1".to_string(),
                kind: StepType::Tool,
                label: "install".to_string(),
                command: Some("true".to_string()),
                args: vec![],
                shell: true,
                cwd: None,
                env_overrides: std::collections::HashMap::from([(
                    "REGISTRY_PASSWORD".to_string(),
                    "hunter2".to_string(),
                )]),
                needs_sudo: false,
                timeout_sec: 5,
                depends_on: vec![],
                retry: None,
                risk: Risk::Low,
                estimated_time_sec: None,
                artifacts: vec![],
                stream: false,
                pm_lock: None,
                restart_hint: None,
                batchable: false,
            }],
            risk_summary: Risk::Low,
            risk_escalation: None,
            confirmation_gate: ConfirmationGate::None,
            warning: None,
            restart: RestartSummary::default(),
            answers: ChoiceBinding::new(),
            inputs: InputBinding::new(),
        };
        PlanState::new_queued(plan)
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let state = sample_state("docker");
        store.save(&state).unwrap();
        let loaded = store.load("docker").unwrap().unwrap();
        assert_eq!(loaded.plan.tool, "docker");
        assert_eq!(loaded.results.len(), 1);
    }

    #[test]
    fn save_redacts_sensitive_env_values_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_state("docker")).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("install_plans/docker.json")).unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("REDACTED"));
    }

    #[test]
    fn load_demotes_running_steps_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut state = sample_state("docker");
        state.results[0].status = StepStatus::Running;
        store.save(&state).unwrap();

        let loaded = store.load("docker").unwrap().unwrap();
        assert_eq!(loaded.results[0].status, StepStatus::Pending);
        assert!(loaded.interruption_reason.is_some());
    }

    #[test]
    fn list_pending_excludes_archived() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store.save(&sample_state("docker")).unwrap();
        store.save(&sample_state("kubectl")).unwrap();
        assert_eq!(store.list_pending().unwrap(), vec!["docker".to_string(), "kubectl".to_string()]);

        store.archive("docker", chrono::Utc::now()).unwrap();
        assert_eq!(store.list_pending().unwrap(), vec!["kubectl".to_string()]);
    }

    #[test]
    fn load_missing_tool_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        assert!(store.load("nope").unwrap().is_none());
    }
}
