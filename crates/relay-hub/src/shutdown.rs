//! Background task tracking and graceful shutdown.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default wait for tracked tasks before giving up on them.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns one cancellation token and the tasks that observe it.
pub struct ShutdownCoordinator {
    token: CancellationToken,
    tasks: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator that waits up to `timeout` on shutdown.
    pub fn new(timeout: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            timeout,
        }
    }

    /// A clone of the shared token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Spawn a task that receives the token, and track it.
    pub fn spawn<F, Fut>(&self, name: &'static str, task: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.token.clone()));
        self.tasks.lock().push((name, handle));
    }

    /// Number of tracked tasks not yet joined.
    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Cancel the token and wait for tracked tasks, aborting stragglers
    /// after the timeout. Returns whether every task finished in time.
    pub async fn shutdown(&self) -> bool {
        self.token.cancel();
        let tasks: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        if tasks.is_empty() {
            return true;
        }
        info!(
            task_count = tasks.len(),
            timeout = ?self.timeout,
            "waiting for background tasks"
        );

        let (names, handles): (Vec<_>, Vec<_>) = tasks.into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(self.timeout, drain).await.is_err() {
            warn!(tasks = ?names, "shutdown timed out, aborting remaining tasks");
            for abort in aborts {
                abort.abort();
            }
            return false;
        }
        true
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}
