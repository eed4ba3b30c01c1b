//! Run-wide cancellation signal.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Reason recorded when a run outlives its `--timeout`.
pub const RUN_DEADLINE: &str = "run-deadline";

/// A cloneable cancellation signal carrying the first reason given.
///
/// Clones observe the same signal. Cancelling is idempotent; later reasons
/// are ignored.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<Option<String>>>,
    rx: watch::Receiver<Option<String>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self, reason: impl Into<String>) {
        let reason = reason.into();
        let changed = self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });
        if changed {
            info!(reason = %reason, "cancellation requested");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this token.
        let _ = rx.wait_for(Option::is_some).await;
    }

    /// Cancel with [`RUN_DEADLINE`] once `after` elapses. Abort the handle to
    /// disarm.
    pub fn cancel_after(&self, after: Duration) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(after) => token.cancel(RUN_DEADLINE),
                () = token.cancelled() => {}
            }
        })
    }

    /// Cancel on SIGINT or SIGTERM.
    pub fn cancel_on_signal(&self) -> JoinHandle<()> {
        let token = self.clone();
        tokio::spawn(async move {
            let ctrl_c = async {
                tokio::signal::ctrl_c().await.ok();
            };

            #[cfg(unix)]
            let terminate = async {
                if let Ok(mut sig) =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                {
                    sig.recv().await;
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                () = ctrl_c => token.cancel("interrupted"),
                () = terminate => token.cancel("terminated"),
                () = token.cancelled() => {}
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel("user");
        token.cancel("later");
        assert!(clone.is_cancelled());
        assert_eq!(clone.reason().as_deref(), Some("user"));
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_deadline_cancels() {
        let token = CancelToken::new();
        let _guard = token.cancel_after(Duration::from_millis(10));
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .unwrap();
        assert_eq!(token.reason().as_deref(), Some(RUN_DEADLINE));
    }
}
