//! Execution Engine (spec §2 component I, §4.8): runs a `Plan`'s DAG of
//! steps with bounded concurrency, per-package-manager exclusive locks, a
//! serialized sudo session, streamed progress events, timeouts with a
//! SIGTERM-then-SIGKILL grace period, retry-with-backoff for retryable
//! runtime errors, and cooperative cancellation.

pub mod config;
pub mod events;
pub mod lock;
pub mod process;
pub mod sudo;

#[cfg(test)]
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use installer_core::types::{PlanPhase, PlanState, Step, StepStatus};
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio::task::JoinSet;

pub use config::EngineConfig;
pub use events::ExecEvent;
pub use lock::PmLockTable;
pub use sudo::SudoSession;

/// A persistence callback invoked after every `PlanState` transition (spec
/// §4.9/§5: the State Store commits on every transition so a crash leaves a
/// well-defined resume point). Synchronous because the State Store's own
/// writes are plain tmp+rename filesystem calls.
pub type PersistHook<'a> = &'a (dyn Fn(&PlanState) + Send + Sync);

#[derive(Debug, Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation flag (spec §4.8: cancellation checked at step
/// boundaries, not via forced task abort, so in-flight steps drain cleanly).
/// `cancelled()` lets a running step's future wake immediately on cancel
/// instead of polling `is_cancelled()` on a timer.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<CancelInner>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.flag.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called. Registers for the
    /// notification before checking the flag so a `cancel()` racing with
    /// this call is never missed.
    pub async fn cancelled(&self) {
        let notified = self.0.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

pub struct Engine {
    config: EngineConfig,
    pm_locks: PmLockTable,
    step_semaphore: Arc<Semaphore>,
    download_semaphore: Arc<Semaphore>,
    build_semaphore: Arc<Semaphore>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            step_semaphore: Arc::new(Semaphore::new(config.max_parallel_steps)),
            download_semaphore: Arc::new(Semaphore::new(config.max_parallel_downloads)),
            build_semaphore: Arc::new(Semaphore::new(config.max_parallel_builds)),
            pm_locks: PmLockTable::new(),
            config,
        }
    }

    /// Marks every step still `Pending` (not in flight, not already
    /// terminal) as `Skipped` on cancellation (spec §4.8: "Dep-unresolved
    /// steps post-cancel transition to `skipped`").
    fn skip_remaining_pending(
        state: &mut PlanState,
        in_flight: &std::collections::HashSet<String>,
        sink: &mpsc::UnboundedSender<ExecEvent>,
    ) {
        let pending_ids: Vec<String> = state
            .results
            .iter()
            .filter(|r| r.status == StepStatus::Pending && !in_flight.contains(&r.step_id))
            .map(|r| r.step_id.clone())
            .collect();
        for step_id in pending_ids {
            if let Some(result) = state.result_mut(&step_id) {
                result.status = StepStatus::Skipped;
                result.error_kind = Some("cancelled".to_string());
            }
            let _ = sink.send(ExecEvent::StepSkipped {
                step_id,
                reason: "cancelled".to_string(),
            });
        }
    }

    /// Establishes the plan's sudo session before any sudo step is allowed
    /// to run (spec §4.8: "at most one concurrent sudo step unless a sudo
    /// session is active" — serialized here by construction, since
    /// authentication completes before the scheduler dispatches anything).
    /// Returns `Err` if no credential could be established within
    /// `sudo_prompt_timeout_sec`.
    async fn establish_sudo_session(
        &self,
        session: &SudoSession,
        sink: &mpsc::UnboundedSender<ExecEvent>,
    ) -> Result<(), installer_core::InstallError> {
        if session.try_non_interactive().await {
            return Ok(());
        }
        let timeout = std::time::Duration::from_secs(self.config.sudo_prompt_timeout_sec);
        let password = match tokio::time::timeout(timeout, session.request_password(sink)).await {
            Ok(Ok(password)) => password,
            Ok(Err(_)) => return Err(installer_core::InstallError::SudoDenied),
            Err(_) => return Err(installer_core::InstallError::SudoRequired),
        };
        if session.validate_password(&password).await {
            Ok(())
        } else {
            Err(installer_core::InstallError::SudoDenied)
        }
    }

    fn permit_kind(step: &Step) -> PermitKind {
        use installer_core::types::StepType;
        match step.kind {
            StepType::Source | StepType::DataPack => PermitKind::Download,
            StepType::Build => PermitKind::Build,
            _ => PermitKind::Step,
        }
    }

    fn semaphore_for(&self, kind: PermitKind) -> Arc<Semaphore> {
        match kind {
            PermitKind::Step => self.step_semaphore.clone(),
            PermitKind::Download => self.download_semaphore.clone(),
            PermitKind::Build => self.build_semaphore.clone(),
        }
    }

    /// Finds steps whose dependencies have all succeeded and which aren't
    /// already running/terminal (spec §4.8 ready-set scheduling).
    fn ready_steps(state: &PlanState, in_flight: &std::collections::HashSet<String>) -> Vec<Step> {
        state
            .plan
            .steps
            .iter()
            .filter(|step| {
                if in_flight.contains(&step.id) {
                    return false;
                }
                let result = state.results.iter().find(|r| r.step_id == step.id);
                if !matches!(result.map(|r| r.status), Some(StepStatus::Pending)) {
                    return false;
                }
                step.depends_on.iter().all(|dep| {
                    state
                        .results
                        .iter()
                        .find(|r| &r.step_id == dep)
                        .map(|r| r.status == StepStatus::Success)
                        .unwrap_or(false)
                })
            })
            .cloned()
            .collect()
    }

    /// Marks every step transitively depending on `failed_step_id` as
    /// `Skipped` with `dep_failed`, per spec §4.8 partial-success
    /// propagation.
    fn propagate_dep_failed(state: &mut PlanState, failed_step_id: &str) {
        let mut frontier = vec![failed_step_id.to_string()];
        while let Some(failed) = frontier.pop() {
            let dependents: Vec<String> = state
                .plan
                .steps
                .iter()
                .filter(|s| s.depends_on.contains(&failed))
                .map(|s| s.id.clone())
                .collect();
            for dep_id in dependents {
                if let Some(result) = state.result_mut(&dep_id) {
                    if result.status == StepStatus::Pending {
                        result.status = StepStatus::Skipped;
                        result.error_kind = Some("dep_failed".to_string());
                        frontier.push(dep_id);
                    }
                }
            }
        }
    }

    /// Runs `plan` to completion (or cancellation/abort), streaming events
    /// on `sink` and returning the final `PlanState` for persistence.
    /// `persist`, when given, is invoked after every `PlanState` transition
    /// (including the initial `queued → running` move) so a crash mid-run
    /// leaves a committed prefix (spec §4.9).
    #[tracing::instrument(skip(self, sink, cancel, persist), fields(tool = %plan_state.plan.tool))]
    pub async fn execute(
        &self,
        mut plan_state: PlanState,
        sink: mpsc::UnboundedSender<ExecEvent>,
        cancel: CancelToken,
        persist: Option<PersistHook<'_>>,
    ) -> PlanState {
        plan_state.phase = PlanPhase::Running;
        if let Some(p) = persist {
            p(&plan_state);
        }

        if plan_state.plan.steps.iter().any(|s| s.needs_sudo) {
            let session = SudoSession::new();
            if let Err(err) = self.establish_sudo_session(&session, &sink).await {
                plan_state.phase = PlanPhase::Failed;
                plan_state.interruption_reason = Some(err.to_string());
                plan_state.updated_at = Utc::now();
                if let Some(p) = persist {
                    p(&plan_state);
                }
                let _ = sink.send(ExecEvent::PlanDone { phase: plan_state.phase });
                return plan_state;
            }
            let refresh_cancel = CancelToken::new();
            let refresh_session = Arc::new(session);
            let refresh_interval = std::time::Duration::from_secs(self.config.sudo_refresh_interval_sec);
            let refresher_cancel = refresh_cancel.clone();
            let refresher_session = refresh_session.clone();
            tokio::spawn(async move {
                refresher_session.refresh_loop(refresh_interval, refresher_cancel).await;
            });
            let result = self.drive(plan_state, sink, cancel, persist).await;
            refresh_cancel.cancel();
            return result;
        }

        self.drive(plan_state, sink, cancel, persist).await
    }

    /// The DAG scheduler loop proper, shared by the sudo and no-sudo paths
    /// of `execute`.
    async fn drive(
        &self,
        mut plan_state: PlanState,
        sink: mpsc::UnboundedSender<ExecEvent>,
        cancel: CancelToken,
        persist: Option<PersistHook<'_>>,
    ) -> PlanState {
        let mut in_flight: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut tasks: JoinSet<(String, StepOutcome)> = JoinSet::new();
        let mut aborted = false;

        loop {
            if cancel.is_cancelled() && !aborted {
                tracing::info!("cancellation requested, draining in-flight steps");
                aborted = true;
                Self::skip_remaining_pending(&mut plan_state, &in_flight, &sink);
                if let Some(p) = persist {
                    p(&plan_state);
                }
            }

            if !aborted {
                for step in Self::ready_steps(&plan_state, &in_flight) {
                    in_flight.insert(step.id.clone());
                    if let Some(result) = plan_state.result_mut(&step.id) {
                        result.status = StepStatus::Running;
                        result.started_at = Some(Utc::now());
                    }
                    if let Some(p) = persist {
                        p(&plan_state);
                    }
                    let sink_clone = sink.clone();
                    let pm_locks = self.pm_locks.clone();
                    let permit_kind = Self::permit_kind(&step);
                    let sem = self.semaphore_for(permit_kind).clone();
                    let step_id = step.id.clone();
                    let cancel_clone = cancel.clone();
                    let drain_sec = self.config.max_drain_sec;
                    tasks.spawn(async move {
                        let _permit = sem.acquire_owned().await.expect("semaphore closed");
                        let outcome =
                            run_step_with_retry(&step, &pm_locks, &sink_clone, &cancel_clone, drain_sec).await;
                        (step_id, outcome)
                    });
                }
            }

            if tasks.is_empty() {
                break;
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let (step_id, outcome) = joined.expect("step task panicked");
            in_flight.remove(&step_id);

            match outcome {
                StepOutcome::Success { exit_code } => {
                    if let Some(result) = plan_state.result_mut(&step_id) {
                        result.status = StepStatus::Success;
                        result.exit_code = Some(exit_code);
                        result.ended_at = Some(Utc::now());
                    }
                    let _ = sink.send(ExecEvent::StepDone { step_id, exit_code });
                }
                StepOutcome::Failed { error_kind, message, exit_code } => {
                    if let Some(result) = plan_state.result_mut(&step_id) {
                        result.status = StepStatus::Failed;
                        result.error_kind = Some(error_kind.clone());
                        result.exit_code = exit_code;
                        result.ended_at = Some(Utc::now());
                    }
                    let _ = sink.send(ExecEvent::StepFailed {
                        step_id: step_id.clone(),
                        error_kind,
                        message,
                    });
                    Self::propagate_dep_failed(&mut plan_state, &step_id);
                    if self.config.abort_on_failure {
                        aborted = true;
                    }
                }
                StepOutcome::Cancelled => {
                    if let Some(result) = plan_state.result_mut(&step_id) {
                        result.status = StepStatus::Cancelled;
                        result.ended_at = Some(Utc::now());
                    }
                }
            }
            if let Some(p) = persist {
                p(&plan_state);
            }
        }

        plan_state.phase = if cancel.is_cancelled() {
            PlanPhase::Cancelled
        } else if plan_state.results.iter().any(|r| r.status == StepStatus::Failed) {
            PlanPhase::Failed
        } else {
            PlanPhase::Succeeded
        };
        plan_state.updated_at = Utc::now();
        if let Some(p) = persist {
            p(&plan_state);
        }
        let _ = sink.send(ExecEvent::PlanDone { phase: plan_state.phase });
        plan_state
    }
}

#[derive(Debug, Clone, Copy)]
enum PermitKind {
    Step,
    Download,
    Build,
}

enum StepOutcome {
    Success { exit_code: i32 },
    Failed {
        error_kind: String,
        message: String,
        exit_code: Option<i32>,
    },
    Cancelled,
}

async fn run_step_with_retry(
    step: &Step,
    pm_locks: &PmLockTable,
    sink: &mpsc::UnboundedSender<ExecEvent>,
    cancel: &CancelToken,
    drain_sec: u64,
) -> StepOutcome {
    let max_attempts = step.retry.as_ref().map(|r| r.max).unwrap_or(0) + 1;
    let backoff_ms = step.retry.as_ref().map(|r| r.backoff_ms).unwrap_or(0);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let _guard = match &step.pm_lock {
            Some(pm) => Some(pm_locks.acquire(pm).await),
            None => None,
        };

        let _ = sink.send(ExecEvent::StepStarted { step_id: step.id.clone() });
        let result = process::run_step(step, sink, cancel, drain_sec).await;

        match result {
            Ok(exit_code) if exit_code == 0 => return StepOutcome::Success { exit_code },
            Ok(exit_code) => {
                let err = installer_core::InstallError::ExitNonzero {
                    step_id: step.id.clone(),
                    code: exit_code,
                };
                if attempt < max_attempts && err.is_retryable() {
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms * attempt as u64)).await;
                    continue;
                }
                return StepOutcome::Failed {
                    error_kind: err.kind().to_string(),
                    message: err.to_string(),
                    exit_code: Some(exit_code),
                };
            }
            Err(installer_core::InstallError::Cancelled) => return StepOutcome::Cancelled,
            Err(err) => {
                if attempt < max_attempts && err.is_retryable() {
                    tokio::time::sleep(std::time::Duration::from_millis(backoff_ms * attempt as u64)).await;
                    continue;
                }
                return StepOutcome::Failed {
                    error_kind: err.kind().to_string(),
                    message: err.to_string(),
                    exit_code: None,
                };
            }
        }
    }
}
