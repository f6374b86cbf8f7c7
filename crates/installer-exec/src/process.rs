//! Step subprocess execution: spawn, stream stdout/stderr as
//! `ExecEvent::StepOutput`, and enforce `timeout_sec` with a
//! SIGTERM-then-10s-grace-then-SIGKILL shutdown (spec §4.8). The spawn and
//! streaming shape is carried over from the grounding workspace's process
//! crate; the timeout policy here is an overall deadline rather than an
//! idle timeout, per spec.

use std::process::Stdio;
use std::time::Duration;

use installer_core::types::Step;
use installer_core::InstallError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc::UnboundedSender;

use crate::events::ExecEvent;
use crate::CancelToken;

fn build_command(step: &Step) -> Option<Command> {
    let raw = step.command.as_ref()?;
    let full = if step.needs_sudo {
        format!("sudo -n {raw}")
    } else {
        raw.clone()
    };

    let mut command = if step.shell {
        let mut c = Command::new("sh");
        c.arg("-c").arg(full);
        c
    } else {
        let mut parts = raw.split_whitespace();
        let mut c = Command::new(parts.next().unwrap_or_default());
        c.args(parts.chain(step.args.iter().map(String::as_str)));
        c
    };

    if let Some(cwd) = &step.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &step.env_overrides {
        command.env(key, value);
    }
    command.stdout(Stdio::piped()).stderr(Stdio::piped());
    Some(command)
}

async fn stream_output(child: &mut Child, step_id: &str, sink: &UnboundedSender<ExecEvent>) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let stdout_task = stdout.map(|out| {
        let sink = sink.clone();
        let step_id = step_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(out).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = sink.send(ExecEvent::StepOutput { step_id: step_id.clone(), line });
            }
        })
    });
    let stderr_task = stderr.map(|err| {
        let sink = sink.clone();
        let step_id = step_id.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(err).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let _ = sink.send(ExecEvent::StepOutput { step_id: step_id.clone(), line });
            }
        })
    });

    if let Some(task) = stdout_task {
        let _ = task.await;
    }
    if let Some(task) = stderr_task {
        let _ = task.await;
    }
}

fn kill(pid: i32, signal: i32) {
    // SAFETY: pid is a live child process id owned by this function's caller.
    unsafe {
        libc::kill(pid, signal);
    }
}

enum Interrupted {
    TimedOut,
    Cancelled,
}

/// Runs one step to completion, returning its exit code or an
/// `InstallError` describing why it couldn't complete (spec §4.8).
/// `cancel` is polled alongside the step's own timeout so an external
/// cancellation SIGTERMs the child immediately rather than waiting out the
/// full `timeout_sec`; either way, `drain_sec` bounds how long the child is
/// given to exit before SIGKILL.
pub async fn run_step(
    step: &Step,
    sink: &UnboundedSender<ExecEvent>,
    cancel: &CancelToken,
    drain_sec: u64,
) -> Result<i32, InstallError> {
    let Some(mut command) = build_command(step) else {
        return Ok(0);
    };

    let mut child = command.spawn().map_err(|e| InstallError::Network {
        message: format!("failed to spawn step {}: {e}", step.id),
    })?;
    let pid = child.id().map(|p| p as i32);

    let timeout = Duration::from_secs(step.timeout_sec);
    let run = async {
        stream_output(&mut child, &step.id, sink).await;
        child.wait().await
    };

    let interrupted = tokio::select! {
        res = run => {
            return match res {
                Ok(status) => Ok(status.code().unwrap_or(-1)),
                Err(e) => Err(InstallError::Network {
                    message: format!("step {} I/O error: {e}", step.id),
                }),
            };
        }
        _ = tokio::time::sleep(timeout) => Interrupted::TimedOut,
        _ = cancel.cancelled() => Interrupted::Cancelled,
    };

    if let Some(pid) = pid {
        kill(pid, libc::SIGTERM);
        let grace = Duration::from_secs(drain_sec);
        if tokio::time::timeout(grace, child.wait()).await.is_err() {
            kill(pid, libc::SIGKILL);
            let _ = child.wait().await;
        }
    }

    match interrupted {
        Interrupted::TimedOut => Err(InstallError::Timeout {
            step_id: step.id.clone(),
            timeout_sec: step.timeout_sec,
        }),
        Interrupted::Cancelled => Err(InstallError::Cancelled),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_core::types::*;
    use std::collections::HashMap;

    fn step(command: &str, timeout_sec: u64) -> Step {
        Step {
            id: "s".to_string(),
            kind: StepType::Tool,
            label: "s".to_string(),
            command: Some(command.to_string()),
            args: vec![],
            shell: true,
            cwd: None,
            env_overrides: HashMap::new(),
            needs_sudo: false,
            timeout_sec,
            depends_on: vec![],
            retry: None,
            risk: Risk::Low,
            estimated_time_sec: None,
            artifacts: vec![],
            stream: true,
            pm_lock: None,
            restart_hint: None,
            batchable: false,
        }
    }

    #[tokio::test]
    async fn captures_exit_code_and_output() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let code = run_step(&step("echo hello; exit 3", 5), &tx, &CancelToken::new(), 5)
            .await
            .unwrap();
        assert_eq!(code, 3);
        let mut saw_hello = false;
        while let Ok(event) = rx.try_recv() {
            if let ExecEvent::StepOutput { line, .. } = event {
                if line == "hello" {
                    saw_hello = true;
                }
            }
        }
        assert!(saw_hello);
    }

    #[tokio::test]
    async fn kills_on_timeout() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let err = run_step(&step("sleep 30", 1), &tx, &CancelToken::new(), 1)
            .await
            .unwrap_err();
        assert!(matches!(err, InstallError::Timeout { .. }));
    }

    #[tokio::test]
    async fn cancel_token_sigterms_before_the_timeout_elapses() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let cancel = CancelToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cancel_clone.cancel();
        });
        let start = tokio::time::Instant::now();
        let err = run_step(&step("sleep 30", 30), &tx, &cancel, 2).await.unwrap_err();
        assert!(matches!(err, InstallError::Cancelled));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
