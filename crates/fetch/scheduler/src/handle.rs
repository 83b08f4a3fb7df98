use std::fmt;
use std::future::Future;
use std::pin::Pin;

use futures_util::future::{FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;

/// Why a fetch task failed. Carried as owned data (not the original
/// error types) so it can be cheaply cloned to every awaiter of a shared
/// [`TaskHandle`]: the completion handle for a node is shared between the
/// registry and all readers awaiting it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum TaskFailure {
    #[error("hash mismatch for chunk {chunk_index}")]
    HashMismatch { chunk_index: u32 },
    #[error("transport failure: {0}")]
    TransportFailure(String),
    #[error("cache write failed: {0}")]
    CacheWriteFailure(String),
    #[error("cancelled")]
    Cancelled,
}

/// The resolution of a scheduled node download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Success { bytes_transferred: u64 },
    Failure(TaskFailure),
}

impl TaskOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

type BoxedCompletion = Pin<Box<dyn Future<Output = TaskOutcome> + Send>>;

/// A cloneable future resolving to a [`TaskOutcome`], shared between
/// whichever readers are awaiting the same node. Cloning a
/// handle is cheap; all clones observe the same resolution.
#[derive(Clone)]
pub struct TaskHandle {
    node: u32,
    completion: Shared<BoxedCompletion>,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle").field("node", &self.node).finish()
    }
}

impl TaskHandle {
    #[must_use]
    pub fn node(&self) -> u32 {
        self.node
    }

    /// Awaits this node's resolution. Multiple awaiters (including
    /// duplicate calls from the same caller) may all call this
    /// concurrently; the underlying transport fetch happens at most once.
    pub async fn wait(&self) -> TaskOutcome {
        self.completion.clone().await
    }
}

/// The write side of a [`TaskHandle`], held by whoever is responsible for
/// eventually resolving it (the executor, or the registry on cancellation).
pub struct Completer {
    node: u32,
    tx: Option<oneshot::Sender<TaskOutcome>>,
}

impl Completer {
    /// Resolves the paired [`TaskHandle`] with `outcome`. A no-op if the
    /// handle side has already been dropped (all awaiters gone).
    pub fn complete(mut self, outcome: TaskOutcome) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(outcome);
        }
    }

    #[must_use]
    pub fn node(&self) -> u32 {
        self.node
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        // A completer dropped without explicit `complete` (e.g. a panic
        // unwinding out of the executor loop) resolves its handle as
        // cancelled rather than hanging every awaiter forever.
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(TaskOutcome::Failure(TaskFailure::Cancelled));
        }
    }
}

/// Creates a fresh, unresolved node-completion pair.
#[must_use]
pub fn pending(node: u32) -> (TaskHandle, Completer) {
    let (tx, rx) = oneshot::channel();
    let completion: BoxedCompletion = Box::pin(async move {
        rx.await.unwrap_or(TaskOutcome::Failure(TaskFailure::Cancelled))
    });
    let handle = TaskHandle {
        node,
        completion: completion.shared(),
    };
    let completer = Completer { node, tx: Some(tx) };
    (handle, completer)
}
