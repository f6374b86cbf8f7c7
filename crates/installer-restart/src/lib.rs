//! Restart Detector & Post-flight (spec §2 component L, §4.11): scans a
//! plan's completed steps for restart hints and aggregates them into the
//! `{shell_restart, reboot_required, service_restart, reasons}` summary
//! surfaced to the caller after `execute` finishes. Grounded on the
//! grounding workspace's hooks crate, which maps discrete events to a
//! fixed set of follow-up actions.

use installer_core::types::{RestartKind, RestartSummary, Step, StepResult, StepStatus};

/// Scans `steps`/`results` for successfully completed steps carrying a
/// `restart_hint` and folds them into one summary (spec §4.11).
pub fn detect(steps: &[Step], results: &[StepResult]) -> RestartSummary {
    let mut summary = RestartSummary::default();

    for step in steps {
        let Some(hint) = step.restart_hint else { continue };
        let succeeded = results
            .iter()
            .find(|r| r.step_id == step.id)
            .map(|r| r.status == StepStatus::Success)
            .unwrap_or(false);
        if !succeeded {
            continue;
        }

        match hint {
            RestartKind::Shell => {
                summary.shell_restart = true;
                summary
                    .reasons
                    .push(format!("{} changed PATH or shell init; restart your shell", step.label));
            }
            RestartKind::Service => {
                let service = service_name_from_label(&step.label);
                if !summary.service_restart.contains(&service) {
                    summary.service_restart.push(service.clone());
                }
                summary.reasons.push(format!("{service} service should be restarted to pick up changes"));
            }
            RestartKind::Reboot => {
                summary.reboot_required = true;
                summary
                    .reasons
                    .push(format!("{} requires a reboot to take effect", step.label));
            }
        }
    }

    summary
}

fn service_name_from_label(label: &str) -> String {
    label
        .split_whitespace()
        .last()
        .unwrap_or(label)
        .trim_end_matches(['.', ','])
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_core::types::*;
    use std::collections::HashMap;

    fn step_with_hint(id: &str, hint: RestartKind) -> Step {
        Step {
            id: id.to_string(),
            kind: StepType::Install,
            label: format!("install {id}"),
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
            artifacts: vec![],
            stream: false,
            pm_lock: None,
            restart_hint: Some(hint),
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
    fn aggregates_shell_and_reboot_hints() {
        let steps = vec![
            step_with_hint("a", RestartKind::Shell),
            step_with_hint("b", RestartKind::Reboot),
        ];
        let results = vec![success("a"), success("b")];
        let summary = detect(&steps, &results);
        assert!(summary.shell_restart);
        assert!(summary.reboot_required);
        assert_eq!(summary.reasons.len(), 2);
    }

    #[test]
    fn failed_steps_contribute_no_hints() {
        let steps = vec![step_with_hint("a", RestartKind::Reboot)];
        let results = vec![StepResult {
            status: StepStatus::Failed,
            ..success("a")
        }];
        let summary = detect(&steps, &results);
        assert!(!summary.reboot_required);
        assert!(summary.reasons.is_empty());
    }

    #[test]
    fn service_restart_names_are_deduped() {
        let mut a = step_with_hint("a", RestartKind::Service);
        a.label = "restart docker".to_string();
        let mut b = step_with_hint("b", RestartKind::Service);
        b.label = "restart docker".to_string();
        let results = vec![success("a"), success("b")];
        let summary = detect(&[a, b], &results);
        assert_eq!(summary.service_restart.len(), 1);
    }
}
