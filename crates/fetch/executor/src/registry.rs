use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use calimero_fetch_scheduler::{pending, Completer, NodeTask, SchedulingTarget, TaskHandle, TaskOutcome};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

/// A resolved task, kept around only for observability.
#[derive(Debug, Clone)]
pub struct CompletedTaskRecord {
    pub node: u32,
    pub outcome: TaskOutcome,
    pub bytes_transferred: u64,
    pub completed_at: Instant,
}

/// The in-flight download registry: de-duplicates concurrent requests for
/// the same node, hands the executor its work queue, and keeps a bounded
/// history for observability.
pub struct InFlightRegistry {
    in_flight: Mutex<HashMap<u32, TaskHandle>>,
    queue_tx: mpsc::UnboundedSender<(NodeTask, Completer)>,
    queue_rx: AsyncMutex<mpsc::UnboundedReceiver<(NodeTask, Completer)>>,
    pending_count: AtomicUsize,
    history: Mutex<VecDeque<CompletedTaskRecord>>,
    history_capacity: usize,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("in_flight_count", &self.in_flight_count())
            .field("pending_count", &self.pending_count())
            .finish()
    }
}

impl InFlightRegistry {
    #[must_use]
    pub fn new(history_capacity: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            in_flight: Mutex::new(HashMap::new()),
            queue_tx,
            queue_rx: AsyncMutex::new(queue_rx),
            pending_count: AtomicUsize::new(0),
            history: Mutex::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
        })
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending_count.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    #[must_use]
    pub fn history_snapshot(&self) -> Vec<CompletedTaskRecord> {
        self.history.lock().iter().cloned().collect()
    }

    /// Pops the head of the pending queue, blocking up to `timeout`. Only
    /// one caller observes a given task: this locks the single receiver for
    /// the duration of the wait, so concurrent worker loops calling this
    /// serialize on dequeuing (not on processing, which happens after the
    /// semaphore permit is acquired).
    pub async fn take_next(&self, timeout: Duration) -> Option<(NodeTask, Completer)> {
        let mut rx = self.queue_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(item)) => {
                self.pending_count.fetch_sub(1, Ordering::AcqRel);
                Some(item)
            }
            Ok(None) | Err(_) => None,
        }
    }

    /// Resolves `completer`'s handle with `outcome`, removes the node from
    /// `in_flight`, and records the result into history.
    pub fn complete(&self, completer: Completer, outcome: TaskOutcome, bytes_transferred: u64) {
        let node = completer.node();
        let _ = self.in_flight.lock().remove(&node);

        let record = CompletedTaskRecord {
            node,
            outcome: outcome.clone(),
            bytes_transferred,
            completed_at: Instant::now(),
        };
        let mut history = self.history.lock();
        history.push_back(record);
        while history.len() > self.history_capacity {
            let _ = history.pop_front();
        }
        drop(history);

        debug!(node, success = outcome.is_success(), bytes_transferred, "task completed");
        completer.complete(outcome);
    }
}

impl SchedulingTarget for InFlightRegistry {
    fn enqueue_or_join(&self, task: NodeTask) -> TaskHandle {
        let mut in_flight = self.in_flight.lock();
        if let Some(existing) = in_flight.get(&task.node) {
            return existing.clone();
        }

        let (handle, completer) = pending(task.node);
        let _ = in_flight.insert(task.node, handle.clone());
        drop(in_flight);

        self.pending_count.fetch_add(1, Ordering::AcqRel);
        // The receiver only goes away when the registry itself is dropped,
        // at which point nothing is left to enqueue onto.
        let _ = self.queue_tx.send((task, completer));
        handle
    }
}
