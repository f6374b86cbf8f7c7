//! Rollback Engine (spec §2 component K, §4.10): given the successfully
//! completed steps of a failed or abandoned plan, builds a reverse-order
//! undo plan and applies it best-effort, accumulating failures rather than
//! aborting on the first one (grounded on the pack's `nix-installer`
//! `uninstall()`, which walks its action list in reverse and collects
//! every error before returning).

use installer_core::types::{Recipe, Step, StepResult, StepStatus, StepType};

#[derive(Debug, Clone)]
pub enum UndoAction {
    /// Run the recipe's `remove` command to uninstall a package/tool.
    RunCommand(String),
    /// Delete a file this step wrote (a build artifact or rendered config).
    RemoveFile(String),
    /// Restore the `.bak` copy a config-template overwrite made before its
    /// first write (spec §6: "first overwrite of a config file creates a
    /// `.bak` copy").
    RestoreBackup { file: String, backup: String },
    /// Nothing to undo (verify/cleanup steps, or no undo is modeled for
    /// this step type).
    None,
}

#[derive(Debug, Clone)]
pub struct UndoStep {
    pub step_id: String,
    pub action: UndoAction,
    pub description: String,
}

#[derive(Debug, Clone, Default)]
pub struct RollbackReport {
    pub applied: Vec<String>,
    pub skipped: Vec<(String, String)>,
    pub failed: Vec<(String, String)>,
}

fn undo_for_step(step: &Step, recipe: Option<&Recipe>) -> UndoAction {
    match step.kind {
        StepType::ConfigTemplate => {
            if let Some(file) = step.artifacts.first() {
                UndoAction::RestoreBackup {
                    file: file.clone(),
                    backup: format!("{file}.bak"),
                }
            } else {
                UndoAction::None
            }
        }
        StepType::Tool | StepType::Packages | StepType::Install => match recipe.and_then(|r| r.remove.clone()) {
            Some(cmd) => UndoAction::RunCommand(cmd),
            None => UndoAction::None,
        },
        StepType::Build | StepType::Source => {
            if let Some(artifact) = step.artifacts.first() {
                UndoAction::RemoveFile(artifact.clone())
            } else {
                UndoAction::None
            }
        }
        StepType::PostInstall => UndoAction::None,
        StepType::DataPack => step
            .artifacts
            .first()
            .map(|a| UndoAction::RemoveFile(a.clone()))
            .unwrap_or(UndoAction::None),
        StepType::RepoSetup => step
            .artifacts
            .first()
            .map(|a| UndoAction::RemoveFile(a.clone()))
            .unwrap_or(UndoAction::None),
        StepType::Service => {
            let name = step.label.split_whitespace().last().unwrap_or(&step.label);
            UndoAction::RunCommand(format!("systemctl disable --now {name}"))
        }
        StepType::Verify | StepType::Cleanup => UndoAction::None,
    }
}

/// Builds the undo plan for every successfully completed step, in reverse
/// completion order (last-succeeded-first), per spec §4.10.
pub fn build_plan(steps: &[Step], results: &[StepResult], recipe: Option<&Recipe>) -> Vec<UndoStep> {
    let mut succeeded: Vec<&Step> = steps
        .iter()
        .filter(|s| {
            results
                .iter()
                .find(|r| r.step_id == s.id)
                .map(|r| r.status == StepStatus::Success)
                .unwrap_or(false)
        })
        .collect();
    succeeded.reverse();

    succeeded
        .into_iter()
        .map(|step| {
            let action = undo_for_step(step, recipe);
            UndoStep {
                step_id: step.id.clone(),
                description: format!("undo {}", step.label),
                action,
            }
        })
        .collect()
}

/// Applies an undo plan best-effort: every step is attempted regardless of
/// whether an earlier one failed, and the outcome of each is recorded in
/// the returned report rather than short-circuiting (spec §4.10).
pub fn apply(plan: Vec<UndoStep>, mut run_command: impl FnMut(&str) -> Result<(), String>) -> RollbackReport {
    let mut report = RollbackReport::default();
    for undo in plan {
        match undo.action {
            UndoAction::None => {
                report.skipped.push((undo.step_id, "no undo modeled for this step".to_string()));
            }
            UndoAction::RunCommand(cmd) => match run_command(&cmd) {
                Ok(()) => report.applied.push(undo.step_id),
                Err(e) => {
                    tracing::warn!(step_id = %undo.step_id, error = %e, "rollback command failed");
                    report.failed.push((undo.step_id, e));
                }
            },
            UndoAction::RemoveFile(path) => match std::fs::remove_file(&path) {
                Ok(()) => report.applied.push(undo.step_id),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    report.skipped.push((undo.step_id, "artifact already absent".to_string()));
                }
                Err(e) => report.failed.push((undo.step_id, e.to_string())),
            },
            UndoAction::RestoreBackup { file, backup } => {
                if std::path::Path::new(&backup).exists() {
                    match std::fs::rename(&backup, &file) {
                        Ok(()) => report.applied.push(undo.step_id),
                        Err(e) => report.failed.push((undo.step_id, e.to_string())),
                    }
                } else {
                    match std::fs::remove_file(&file) {
                        Ok(()) => report.applied.push(undo.step_id),
                        Err(_) => report.skipped.push((undo.step_id, "no backup and file already absent".to_string())),
                    }
                }
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_core::types::*;
    use std::collections::HashMap;

    fn step(id: &str, kind: StepType, artifacts: Vec<&str>) -> Step {
        Step {
            id: id.to_string(),
            kind,
            label: id.to_string(),
            command: None,
            args: vec![],
            shell: false,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec: 5,
            depends_on: vec![],
            retry: None,
            risk: Risk::Low,
            estimated_time_sec: None,
            artifacts: artifacts.into_iter().map(String::from).collect(),
            stream: false,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        }
    }

    fn success(step_id: &str) -> StepResult {
        StepResult {
            step_id: step_id.to_string(),
            status: StepStatus::Success,
            started_at: None,
            ended_at: None,
            exit_code: Some(0),
            output_tail: String::new(),
            error_kind: None,
            retries_used: 0,
        }
    }

    #[test]
    fn build_plan_reverses_completion_order() {
        let steps = vec![
            step("a::packages", StepType::Packages, vec![]),
            step("a::tool", StepType::Tool, vec![]),
            step("a::verify", StepType::Verify, vec![]),
        ];
        let results = vec![success("a::packages"), success("a::tool"), success("a::verify")];
        let plan = build_plan(&steps, &results, None);
        assert_eq!(
            plan.iter().map(|u| u.step_id.clone()).collect::<Vec<_>>(),
            vec!["a::verify", "a::tool", "a::packages"]
        );
    }

    #[test]
    fn build_plan_skips_steps_that_never_succeeded() {
        let steps = vec![step("a::tool", StepType::Tool, vec![])];
        let results = vec![StepResult {
            status: StepStatus::Failed,
            ..success("a::tool")
        }];
        assert!(build_plan(&steps, &results, None).is_empty());
    }

    #[test]
    fn apply_continues_past_a_failing_step() {
        let plan = vec![
            UndoStep {
                step_id: "first".into(),
                action: UndoAction::RunCommand("false-cmd".into()),
                description: "d".into(),
            },
            UndoStep {
                step_id: "second".into(),
                action: UndoAction::RunCommand("ok-cmd".into()),
                description: "d".into(),
            },
        ];
        let report = apply(plan, |cmd| {
            if cmd == "false-cmd" {
                Err("exit code 1".to_string())
            } else {
                Ok(())
            }
        });
        assert_eq!(report.failed, vec![("first".to_string(), "exit code 1".to_string())]);
        assert_eq!(report.applied, vec!["second".to_string()]);
    }

    #[test]
    fn service_step_undoes_via_systemctl_disable() {
        let mut docker_service = step("docker::service::docker", StepType::Service, vec![]);
        docker_service.label = "enable and start docker".to_string();
        let action = undo_for_step(&docker_service, None);
        match action {
            UndoAction::RunCommand(cmd) => assert_eq!(cmd, "systemctl disable --now docker"),
            other => panic!("expected RunCommand, got {other:?}"),
        }
    }

    #[test]
    fn repo_setup_step_undoes_by_removing_the_source_file() {
        let repo_step = step("docker::repo_setup::docker-ce", StepType::RepoSetup, vec!["/etc/apt/sources.list.d/docker.list"]);
        let action = undo_for_step(&repo_step, None);
        match action {
            UndoAction::RemoveFile(path) => assert_eq!(path, "/etc/apt/sources.list.d/docker.list"),
            other => panic!("expected RemoveFile, got {other:?}"),
        }
    }

    #[test]
    fn none_action_is_skipped_not_failed() {
        let plan = vec![UndoStep {
            step_id: "v".into(),
            action: UndoAction::None,
            description: "d".into(),
        }];
        let report = apply(plan, |_| Ok(()));
        assert!(report.failed.is_empty());
        assert_eq!(report.skipped.len(), 1);
    }
}
