//! Sudo session management (spec §4.8, §9): a background `sudo -v`
//! refresher keeps one authenticated session alive for the whole plan, and
//! password prompts are modeled as a request/response pair keyed by a
//! nonce rather than a raw synchronous stdin read, since the caller may be
//! on the other end of an SSE connection (spec §9: "sudo-over-SSE is
//! request/response with a nonce").

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, Mutex};

use crate::events::ExecEvent;

#[derive(Default)]
pub struct SudoSession {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<String>>>>,
    authenticated: Arc<Mutex<bool>>,
}

impl SudoSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits `ExecEvent::SudoPrompt` with a fresh nonce and waits for the
    /// caller to supply the password via `fulfill`. Returns
    /// `InstallError::SudoDenied` if the channel closes without a reply.
    pub async fn request_password(
        &self,
        sink: &tokio::sync::mpsc::UnboundedSender<ExecEvent>,
    ) -> Result<String, installer_core::InstallError> {
        let nonce = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(nonce.clone(), tx);
        let _ = sink.send(ExecEvent::SudoPrompt { nonce: nonce.clone() });
        match rx.await {
            Ok(password) => {
                *self.authenticated.lock().await = true;
                Ok(password)
            }
            Err(_) => Err(installer_core::InstallError::SudoDenied),
        }
    }

    /// Called by the transport layer when the user answers a sudo prompt.
    /// Returns `false` if the nonce is unknown (already answered or
    /// expired).
    pub async fn fulfill(&self, nonce: &str, password: String) -> bool {
        if let Some(tx) = self.pending.lock().await.remove(nonce) {
            tx.send(password).is_ok()
        } else {
            false
        }
    }

    pub async fn is_authenticated(&self) -> bool {
        *self.authenticated.lock().await
    }

    /// Tries `sudo -n -v`: succeeds without a prompt when the user has
    /// passwordless sudo or an already-cached credential. Marks the session
    /// authenticated on success.
    pub async fn try_non_interactive(&self) -> bool {
        let status = tokio::process::Command::new("sudo").arg("-n").arg("-v").status().await;
        let ok = matches!(status, Ok(s) if s.success());
        if ok {
            *self.authenticated.lock().await = true;
        }
        ok
    }

    /// Validates `password` against `sudo -S -v`, piping it on stdin rather
    /// than ever passing it as an argument. Marks the session authenticated
    /// on success.
    pub async fn validate_password(&self, password: &str) -> bool {
        use tokio::io::AsyncWriteExt;
        let mut child = match tokio::process::Command::new("sudo")
            .arg("-S")
            .arg("-v")
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
        {
            Ok(c) => c,
            Err(_) => return false,
        };
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(format!("{password}\n").as_bytes()).await;
        }
        let ok = matches!(child.wait().await, Ok(s) if s.success());
        if ok {
            *self.authenticated.lock().await = true;
        }
        ok
    }

    /// Runs a `sudo -v` refresh every `interval` until cancelled, keeping
    /// the session from expiring mid-plan. Spawn this once per `execute`
    /// call alongside the scheduler loop.
    pub async fn refresh_loop(&self, interval: std::time::Duration, cancel: crate::CancelToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            if *self.authenticated.lock().await {
                let status = tokio::process::Command::new("sudo").arg("-v").status().await;
                if let Ok(status) = status {
                    if !status.success() {
                        tracing::warn!("sudo -v refresh failed, session may have expired");
                    }
                }
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fulfill_unblocks_request_password() {
        let session = Arc::new(SudoSession::new());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let session_clone = session.clone();
        let handle = tokio::spawn(async move { session_clone.request_password(&tx).await });

        let ExecEvent::SudoPrompt { nonce } = rx.recv().await.unwrap() else {
            panic!("expected SudoPrompt");
        };
        assert!(session.fulfill(&nonce, "hunter2".to_string()).await);
        assert_eq!(handle.await.unwrap().unwrap(), "hunter2");
        assert!(session.is_authenticated().await);
    }

    #[tokio::test]
    async fn unknown_nonce_fulfill_is_false() {
        let session = SudoSession::new();
        assert!(!session.fulfill("no-such-nonce", "x".to_string()).await);
    }
}
