//! The execution event-sink contract (spec §6). In-process this is a
//! `tokio::sync::mpsc` channel of `ExecEvent`; the HTTP/SSE transport that
//! multiplexes these over one stream by `step_id` is out of scope (spec
//! §1) and lives above this crate.

use installer_core::types::PlanPhase;

#[derive(Debug, Clone)]
pub enum ExecEvent {
    StepStarted { step_id: String },
    StepOutput { step_id: String, line: String },
    StepDone { step_id: String, exit_code: i32 },
    StepFailed {
        step_id: String,
        error_kind: String,
        message: String,
    },
    StepSkipped { step_id: String, reason: String },
    NetworkWarning { step_id: String, message: String },
    SudoPrompt { nonce: String },
    PlanDone { phase: PlanPhase },
}
