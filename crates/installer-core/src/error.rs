//! `InstallError`: the resolution/runtime error taxonomy (spec §7).

use thiserror::Error;

/// One variant per spec §7 error kind. Resolution-time variants are
/// returned from `resolve`; runtime variants from `execute`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InstallError {
    #[error("unknown tool: {tool}")]
    UnknownTool { tool: String },

    #[error("no viable install method for {tool}: {reasons:?}")]
    NoViableMethod { tool: String, reasons: Vec<String> },

    #[error("no available option for choice {choice_id}")]
    NoAvailableOption { choice_id: String },

    #[error("dependency cycle: {cycle:?}")]
    DependencyCycle { cycle: Vec<String> },

    #[error("unresolved template variable(s) in {file}: {vars:?}")]
    TemplateUnresolved { file: String, vars: Vec<String> },

    #[error("missing build toolchain: {missing:?}")]
    ToolchainMissing { missing: Vec<String> },

    #[error("insufficient {resource}: need {needed}, have {available}")]
    ResourceInsufficient {
        resource: String,
        needed: u64,
        available: u64,
    },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("network timeout after {timeout_sec}s")]
    NetworkTimeout { timeout_sec: u64 },

    #[error("registry unreachable: {url}")]
    RegistryUnreachable { url: String },

    #[error("sudo required but unavailable")]
    SudoRequired,

    #[error("sudo authentication denied")]
    SudoDenied,

    #[error("package manager lock conflict: {pm}")]
    PmLockConflict { pm: String },

    #[error("step {step_id} exited with code {code}")]
    ExitNonzero { step_id: String, code: i32 },

    #[error("step {step_id} timed out after {timeout_sec}s")]
    Timeout { step_id: String, timeout_sec: u64 },

    #[error("cancelled")]
    Cancelled,

    #[error("dependency step {dep_step_id} failed, skipping {step_id}")]
    DepFailed { step_id: String, dep_step_id: String },
}

impl InstallError {
    /// The stable `error_kind` string used in `PlanResponse::Error` and
    /// `StepResult::error_kind` (spec §6, §7).
    pub fn kind(&self) -> &'static str {
        match self {
            InstallError::UnknownTool { .. } => "unknown_tool",
            InstallError::NoViableMethod { .. } => "no_viable_method",
            InstallError::NoAvailableOption { .. } => "no_available_option",
            InstallError::DependencyCycle { .. } => "dependency_cycle",
            InstallError::TemplateUnresolved { .. } => "template_unresolved",
            InstallError::ToolchainMissing { .. } => "toolchain_missing",
            InstallError::ResourceInsufficient { .. } => "resource_insufficient",
            InstallError::Network { .. } => "network",
            InstallError::NetworkTimeout { .. } => "network_timeout",
            InstallError::RegistryUnreachable { .. } => "registry_unreachable",
            InstallError::SudoRequired => "sudo_required",
            InstallError::SudoDenied => "sudo_denied",
            InstallError::PmLockConflict { .. } => "pm_lock_conflict",
            InstallError::ExitNonzero { .. } => "exit_nonzero",
            InstallError::Timeout { .. } => "timeout",
            InstallError::Cancelled => "cancelled",
            InstallError::DepFailed { .. } => "dep_failed",
        }
    }

    /// Runtime error classes eligible for step retry (spec §4.8).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            InstallError::Network { .. }
                | InstallError::NetworkTimeout { .. }
                | InstallError::RegistryUnreachable { .. }
                | InstallError::PmLockConflict { .. }
        )
    }

    /// True for errors raised by `resolve` rather than `execute`.
    pub fn is_resolution_time(&self) -> bool {
        matches!(
            self,
            InstallError::UnknownTool { .. }
                | InstallError::NoViableMethod { .. }
                | InstallError::NoAvailableOption { .. }
                | InstallError::DependencyCycle { .. }
                | InstallError::TemplateUnresolved { .. }
                | InstallError::ToolchainMissing { .. }
                | InstallError::ResourceInsufficient { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_text_is_stable() {
        let e = InstallError::UnknownTool {
            tool: "foo".into(),
        };
        assert_eq!(e.to_string(), "unknown tool: foo");

        let e = InstallError::ExitNonzero {
            step_id: "s1".into(),
            code: 7,
        };
        assert_eq!(e.to_string(), "step s1 exited with code 7");
    }

    #[test]
    fn kind_strings_match_taxonomy() {
        assert_eq!(InstallError::SudoRequired.kind(), "sudo_required");
        assert_eq!(InstallError::Cancelled.kind(), "cancelled");
        assert_eq!(
            InstallError::DepFailed {
                step_id: "a".into(),
                dep_step_id: "b".into()
            }
            .kind(),
            "dep_failed"
        );
    }

    #[test]
    fn retryable_classes_match_spec() {
        assert!(InstallError::Network { message: "x".into() }.is_retryable());
        assert!(InstallError::PmLockConflict { pm: "apt".into() }.is_retryable());
        assert!(!InstallError::SudoDenied.is_retryable());
        assert!(!InstallError::Cancelled.is_retryable());
    }

    #[test]
    fn resolution_time_split_matches_spec() {
        assert!(InstallError::NoViableMethod {
            tool: "x".into(),
            reasons: vec![]
        }
        .is_resolution_time());
        assert!(!InstallError::Timeout {
            step_id: "s".into(),
            timeout_sec: 1
        }
        .is_resolution_time());
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InstallError>();
    }
}
