//! Graceful shutdown: stop accepting, close every session, then return.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// Default time open sessions get to tear down.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Owns the server-wide cancellation token and tracks connection tasks so
/// shutdown can wait for their teardown.
#[derive(Clone, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    connections: TaskTracker,
}

impl ShutdownCoordinator {
    /// Fresh coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal every task to stop.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a connection future so [`drain`](Self::drain) waits for it.
    pub fn track_connection<F: Future>(&self, fut: F) -> TrackedFuture<F> {
        self.connections.track_future(fut)
    }

    /// Connection tasks still running.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Signal shutdown and wait up to `timeout` for every connection task.
    pub async fn drain(&self, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);
        self.shutdown();
        let _ = self.connections.close();
        info!(
            connections = self.connections.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to close"
        );
        if tokio::time::timeout(timeout, self.connections.wait()).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some sessions may still be open");
        }
    }
}
