//! Background tasks owned by a session.

use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const JOIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Spawns cancellable tasks and joins them on shutdown.
pub struct Supervisor {
    token: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Supervisor {
    /// Supervisor with no tasks.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Run `fut` until it finishes or the supervisor is cancelled.
    ///
    /// After cancellation new tasks are not started.
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.token.is_cancelled() {
            debug!(task = name, "supervisor cancelled, not spawning");
            return;
        }
        let token = self.token.clone();
        let handle = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => debug!(task = name, "task cancelled"),
                () = fut => {}
            }
        });
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal every task to stop.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Number of tasks still running.
    pub fn running(&self) -> usize {
        self.handles.lock().iter().filter(|h| !h.is_finished()).count()
    }

    /// Cancel and wait for every task to exit.
    pub async fn shutdown(&self) {
        self.cancel();
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        if tokio::time::timeout(JOIN_TIMEOUT, join_all(handles)).await.is_err() {
            warn!("session tasks did not stop within {JOIN_TIMEOUT:?}");
        }
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
