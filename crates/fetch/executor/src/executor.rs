use std::sync::Arc;

use calimero_fetch_scheduler::{NodeTask, TaskFailure, TaskOutcome};
use calimero_merkle_tree::{State, TreeError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

use crate::cache::LocalCache;
use crate::config::ExecutorConfig;
use crate::registry::InFlightRegistry;
use crate::transport::Transport;

/// A worker pool that drains [`InFlightRegistry`]'s queue, fetches from
/// `transport`, verifies against `state`, and persists into `cache`.
///
/// Retries are deliberately not an executor concern: a failed task simply
/// completes its handle with failure, and it is up to whoever re-schedules
/// (the channel facade) to try again.
///
/// Requires a multi-threaded Tokio runtime: chunk verification briefly
/// blocks a worker thread on synchronous cache I/O via
/// [`tokio::task::block_in_place`].
#[derive(Debug)]
pub struct Executor {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl Executor {
    /// Spawns `config.concurrency` worker loops against `registry`,
    /// verifying downloads against `state` and persisting them via `cache`.
    pub fn spawn(
        registry: Arc<InFlightRegistry>,
        state: State,
        transport: Arc<dyn Transport>,
        cache: LocalCache,
        config: ExecutorConfig,
    ) -> Self {
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        let workers = (0..config.concurrency)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&registry),
                    Arc::clone(&semaphore),
                    state.clone(),
                    Arc::clone(&transport),
                    cache.clone(),
                    config.take_next_timeout,
                    cancel.clone(),
                ))
            })
            .collect();

        Self { cancel, workers }
    }

    /// Signals every worker to stop taking new tasks and waits for
    /// in-flight ones to finish, bounded by `timeout`.
    pub async fn shutdown(self, timeout: std::time::Duration) {
        self.cancel.cancel();
        let joins = futures_util::future::join_all(self.workers);
        if tokio::time::timeout(timeout, joins).await.is_err() {
            warn!("executor shutdown timed out; workers were not joined cleanly");
        }
    }
}

async fn worker_loop(
    id: usize,
    registry: Arc<InFlightRegistry>,
    semaphore: Arc<Semaphore>,
    state: State,
    transport: Arc<dyn Transport>,
    cache: LocalCache,
    take_next_timeout: std::time::Duration,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            () = cancel.cancelled() => break,
            next = registry.take_next(take_next_timeout) => next,
        };
        let Some((task, completer)) = next else {
            continue;
        };

        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            // Semaphore only closes if `close()` is called, which nothing
            // here does; unreachable in practice.
            completer.complete(TaskOutcome::Failure(TaskFailure::Cancelled));
            continue;
        };

        let registry = Arc::clone(&registry);
        let state = state.clone();
        let transport = Arc::clone(&transport);
        let cache = cache.clone();
        let _ = tokio::spawn(async move {
            let _permit = permit;
            let (outcome, bytes_transferred) = run_task(id, &task, &state, transport.as_ref(), &cache).await;
            registry.complete(completer, outcome, bytes_transferred);
        });
    }
}

#[instrument(skip(state, transport, cache), fields(worker = worker_id, node = task.node))]
async fn run_task(
    worker_id: usize,
    task: &NodeTask,
    state: &State,
    transport: &dyn Transport,
    cache: &LocalCache,
) -> (TaskOutcome, u64) {
    let buffer = match transport.fetch_range(task.start, task.length).await {
        Ok(buffer) => buffer,
        Err(err) => {
            warn!(worker_id, node = task.node, %err, "transport failure");
            return (TaskOutcome::Failure(TaskFailure::TransportFailure(err.to_string())), 0);
        }
    };

    if buffer.len() as u64 != task.length {
        let msg = format!("expected {} bytes, got {}", task.length, buffer.len());
        warn!(worker_id, node = task.node, %msg, "short transport read");
        return (TaskOutcome::Failure(TaskFailure::TransportFailure(msg)), 0);
    }

    let shape = state.shape();
    let bytes_transferred = buffer.len() as u64;

    if task.is_leaf {
        let chunk_index = task.first_chunk;
        let start = task.start;
        let outcome = tokio::task::block_in_place(|| {
            save_chunk(state, cache, chunk_index, &buffer, start)
        });
        return (outcome, bytes_transferred);
    }

    let mut offset_in_buffer = 0usize;
    for chunk_index in task.first_chunk..task.last_chunk_exclusive {
        let chunk_len = shape.actual_chunk_size(chunk_index) as usize;
        let Some(slice) = buffer.get(offset_in_buffer..offset_in_buffer + chunk_len) else {
            warn!(worker_id, node = task.node, chunk_index, "slice underflow while splitting internal-node payload");
            return (TaskOutcome::Failure(TaskFailure::TransportFailure("slice underflow".to_owned())), 0);
        };
        let chunk_start = shape.chunk_start(chunk_index);
        let outcome = tokio::task::block_in_place(|| save_chunk(state, cache, chunk_index, slice, chunk_start));
        if !outcome.is_success() {
            return (outcome, 0);
        }
        offset_in_buffer += chunk_len;
    }

    (TaskOutcome::Success { bytes_transferred }, bytes_transferred)
}

/// Verifies and persists one chunk's payload. Runs inside
/// `block_in_place` because `save_if_valid`'s write callback performs
/// synchronous positional I/O plus fsync.
fn save_chunk(state: &State, cache: &LocalCache, chunk_index: u32, payload: &[u8], cache_offset: u64) -> TaskOutcome {
    match state.save_if_valid(chunk_index, payload, |data| cache.write_at(cache_offset, data)) {
        Ok(true) => TaskOutcome::Success { bytes_transferred: payload.len() as u64 },
        Ok(false) => TaskOutcome::Failure(TaskFailure::HashMismatch { chunk_index }),
        Err(TreeError::CacheWrite(err)) => TaskOutcome::Failure(TaskFailure::CacheWriteFailure(err.to_string())),
        Err(err) => TaskOutcome::Failure(TaskFailure::TransportFailure(err.to_string())),
    }
}
