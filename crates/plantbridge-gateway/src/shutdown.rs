//! Process-wide shutdown via one `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time background tasks get to finish before we give up on them.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared by the model owner, the session sweep, the gateway and every
/// socket task.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve on Ctrl-C, SIGTERM (unix) or an earlier [`Self::shutdown`].
    pub async fn wait_for_signal(&self) {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sig) => {
                    sig.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            () = ctrl_c => info!("received ctrl-c"),
            () = terminate => info!("received SIGTERM"),
            () = self.token.cancelled() => {}
        }
    }

    /// Cancel the token, then give `handles` until one shared deadline to
    /// finish. Returns false if any were still running at the deadline.
    pub async fn graceful_shutdown(
        &self,
        handles: Vec<JoinHandle<()>>,
        timeout: Option<Duration>,
    ) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        let deadline = Instant::now() + timeout;
        let total = handles.len();

        self.shutdown();
        info!(tasks = total, timeout_ms = timeout.as_millis() as u64, "draining tasks");

        let mut stuck = 0usize;
        for handle in handles {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "task ended abnormally during shutdown"),
                Err(_) => stuck += 1,
            }
        }
        if stuck > 0 {
            warn!(stuck, total, "shutdown deadline passed with tasks still running");
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running() {
        assert!(!ShutdownCoordinator::default().is_shutting_down());
    }

    #[test]
    fn every_token_is_cancelled() {
        let coord = ShutdownCoordinator::new();
        let owner = coord.token();
        let sweep = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(owner.is_cancelled());
        assert!(sweep.is_cancelled());
        assert!(coord.is_shutting_down());
    }

    #[tokio::test]
    async fn signal_wait_returns_after_manual_shutdown() {
        let coord = ShutdownCoordinator::new();
        coord.shutdown();
        tokio::time::timeout(Duration::from_secs(1), coord.wait_for_signal())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });
        assert!(coord.graceful_shutdown(vec![handle], None).await);
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_gives_up_on_stuck_tasks() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });
        let drained = coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(!drained);
    }

    #[tokio::test]
    async fn panicked_task_does_not_block_shutdown() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async { panic!("boom") });
        assert!(coord.graceful_shutdown(vec![handle], None).await);
    }
}
