//! Graceful shutdown coordination via `CancellationToken` and `TaskTracker`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Bound on waiting for accept loops, which stop as soon as they are
/// cancelled.
const ACCEPT_LOOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Coordinates shutdown across accept loops, routing tasks and sessions.
///
/// Every endpoint token is a child of the root token, and every session
/// token a child of its endpoint's, so cancelling the root reaches all of
/// them. Routing and session tasks are spawned on the tracker so they can be
/// drained.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tracker: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Get a clone of the root cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// A token cancelled with the root but cancellable on its own.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }

    /// Tracker for connection-scoped tasks.
    pub fn tracker(&self) -> TaskTracker {
        self.tracker.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait for accept loops to return after cancellation.
    pub async fn join_accept_loops(&self, handles: Vec<JoinHandle<()>>) {
        let count = handles.len();
        let joined = futures::future::join_all(handles);
        if tokio::time::timeout(ACCEPT_LOOP_TIMEOUT, joined).await.is_err() {
            warn!(count, "accept loops did not stop within {ACCEPT_LOOP_TIMEOUT:?}");
        }
    }

    /// Wait up to `timeout` for every tracked task to finish.
    ///
    /// Returns `true` if all of them did.
    pub async fn drain(&self, timeout: Duration) -> bool {
        let _ = self.tracker.close();
        info!(
            task_count = self.tracker.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for sessions to finish"
        );
        if tokio::time::timeout(timeout, self.tracker.wait()).await.is_err() {
            warn!(
                remaining = self.tracker.len(),
                "shutdown timed out after {timeout:?}, some sessions may still be running"
            );
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
