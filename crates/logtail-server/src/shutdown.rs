//! Graceful shutdown: one cancellation token for the listener plus a task
//! tracker for streamer tasks.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Coordinates shutdown across the listener and streamers.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: TaskTracker,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker that background tasks are spawned on.
    pub fn tasks(&self) -> TaskTracker {
        self.tasks.clone()
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for every tracked task.
    ///
    /// Returns `false` if tasks were still running when the timeout hit.
    pub async fn graceful_shutdown(&self, timeout: Duration) -> bool {
        self.shutdown();
        let _ = self.tasks.close();
        info!(
            task_count = self.tasks.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        if tokio::time::timeout(timeout, self.tasks.wait()).await.is_err() {
            warn!(
                remaining = self.tasks.len(),
                "shutdown timed out after {timeout:?}, some tasks may still be running"
            );
            return false;
        }
        true
    }
}
