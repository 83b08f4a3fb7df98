use calimero_merkle_shape::Shape;
use calimero_merkle_tree::State;

use crate::handle::TaskHandle;
use crate::target::SchedulingTarget;
use crate::task::{NodeTask, Reason, SchedulingDecision};

/// Default cap on a single transport call's byte length: 2^31 - 1 bytes, a
/// safe default matching common buffer-length constraints (many transports
/// and buffer APIs use a signed 32-bit length).
pub const DEFAULT_MAX_TRANSPORT_CHUNK_SIZE: u64 = (1u64 << 31) - 1;

/// Produces node download tasks for a byte range, given the current
/// verification state.
///
/// Implementations must be stateless: all durable state lives in the
/// [`State`] and the [`SchedulingTarget`] passed in on each call.
pub trait Scheduler: Send + Sync {
    /// Selects and enqueues nodes covering `[offset, offset + length)`,
    /// returning a handle per node actually requiring download. Chunks
    /// already valid contribute no handle (nothing to await).
    fn schedule_downloads(
        &self,
        offset: u64,
        length: u64,
        shape: Shape,
        state: &State,
        target: &dyn SchedulingTarget,
    ) -> Vec<TaskHandle>;

    /// The same selection logic as `schedule_downloads`, but side-effect
    /// free: returns the decisions that would be made without touching the
    /// scheduling target.
    fn analyze(&self, offset: u64, length: u64, shape: Shape, state: &State) -> Vec<SchedulingDecision>;
}

/// Never coalesces: every missing chunk becomes its own leaf task. Minimizes
/// over-download at the cost of more round trips.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConservativeScheduler;

impl Scheduler for ConservativeScheduler {
    fn schedule_downloads(
        &self,
        offset: u64,
        length: u64,
        shape: Shape,
        state: &State,
        target: &dyn SchedulingTarget,
    ) -> Vec<TaskHandle> {
        enqueue_selected(&self.analyze(offset, length, shape, state), &shape, target)
    }

    fn analyze(&self, offset: u64, length: u64, shape: Shape, state: &State) -> Vec<SchedulingDecision> {
        select(offset, length, &shape, state, u64::MAX, false)
    }
}

/// Coalesces maximally under `max_transport_chunk_size`, minimizing round
/// trips at the cost of potentially over-downloading bytes neighboring the
/// requested range.
#[derive(Debug, Clone, Copy)]
pub struct AggressiveScheduler {
    max_transport_chunk_size: u64,
}

impl Default for AggressiveScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSPORT_CHUNK_SIZE)
    }
}

impl AggressiveScheduler {
    #[must_use]
    pub fn new(max_transport_chunk_size: u64) -> Self {
        Self { max_transport_chunk_size }
    }
}

impl Scheduler for AggressiveScheduler {
    fn schedule_downloads(
        &self,
        offset: u64,
        length: u64,
        shape: Shape,
        state: &State,
        target: &dyn SchedulingTarget,
    ) -> Vec<TaskHandle> {
        enqueue_selected(&self.analyze(offset, length, shape, state), &shape, target)
    }

    fn analyze(&self, offset: u64, length: u64, shape: Shape, state: &State) -> Vec<SchedulingDecision> {
        select(offset, length, &shape, state, self.max_transport_chunk_size, true)
    }
}

fn enqueue_selected(decisions: &[SchedulingDecision], shape: &Shape, target: &dyn SchedulingTarget) -> Vec<TaskHandle> {
    decisions
        .iter()
        .filter(|d| d.reason != Reason::AlreadyValidSkip)
        .map(|d| target.enqueue_or_join(NodeTask::from_node(shape, d.node)))
        .collect()
}

/// Computes the inclusive chunk range covered by `[offset, offset+length)`,
/// clamped to `[0, total_chunks)`. Returns `None` for an empty
/// request or content.
fn chunk_range(offset: u64, length: u64, shape: &Shape) -> Option<(u32, u32)> {
    if length == 0 || shape.total_chunks() == 0 || offset >= shape.content_size() {
        return None;
    }
    let end = offset.saturating_add(length).min(shape.content_size());
    if end <= offset {
        return None;
    }
    let first = shape.chunk_index_for_position(offset);
    let last = shape.chunk_index_for_position(end - 1);
    Some((first, last))
}

fn select(offset: u64, length: u64, shape: &Shape, state: &State, max_bytes: u64, coalesce: bool) -> Vec<SchedulingDecision> {
    let Some((first_chunk, last_chunk)) = chunk_range(offset, length, shape) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    visit(0, false, shape, state, first_chunk, last_chunk, max_bytes, coalesce, &mut out);
    out
}

/// True iff every real chunk in `[a, min(b, total_chunks))` is missing.
/// Virtual leaves beyond `total_chunks` never block coalescing: there is no
/// content there to be missing.
fn all_real_leaves_missing(shape: &Shape, state: &State, a: u32, b: u32) -> bool {
    let real_end = b.min(shape.total_chunks());
    a < real_end && (a..real_end).all(|i| !state.is_valid(i))
}

#[allow(clippy::too_many_arguments)]
fn visit(
    node: u32,
    forced_split: bool,
    shape: &Shape,
    state: &State,
    first_chunk: u32,
    last_chunk: u32,
    max_bytes: u64,
    coalesce: bool,
    out: &mut Vec<SchedulingDecision>,
) {
    let (a, b) = shape.leaf_range_for_node(node);
    if b <= first_chunk || a > last_chunk {
        return; // no overlap with the requested range
    }

    if shape.is_leaf_node(node) {
        let Some(chunk) = shape.leaf_node_to_chunk_index(node) else {
            return; // virtual leaf: nothing to fetch
        };
        if chunk < first_chunk || chunk > last_chunk {
            return;
        }
        let reason = if state.is_valid(chunk) {
            Reason::AlreadyValidSkip
        } else if forced_split {
            Reason::TransportLimitSplit
        } else {
            Reason::MinimalDownload
        };
        out.push(SchedulingDecision { node, reason });
        return;
    }

    let within_request = a >= first_chunk && b.saturating_sub(1) <= last_chunk;
    if coalesce && within_request && all_real_leaves_missing(shape, state, a, b) {
        let (start, end) = shape.byte_range_for_node(node);
        if end - start <= max_bytes {
            let reason = if forced_split { Reason::TransportLimitSplit } else { Reason::Coalesced };
            out.push(SchedulingDecision { node, reason });
            return;
        }
        // This node would coalesce were it not for the transport limit;
        // split into its children and let them absorb the selection.
        visit(2 * node + 1, true, shape, state, first_chunk, last_chunk, max_bytes, coalesce, out);
        visit(2 * node + 2, true, shape, state, first_chunk, last_chunk, max_bytes, coalesce, out);
        return;
    }

    visit(2 * node + 1, false, shape, state, first_chunk, last_chunk, max_bytes, coalesce, out);
    visit(2 * node + 2, false, shape, state, first_chunk, last_chunk, max_bytes, coalesce, out);
}

#[cfg(test)]
mod tests {
    use super::*;
    use calimero_merkle_store::MerkleHash;
    use calimero_merkle_tree::Reference;
    use tempfile::tempdir;

    struct NullTarget;
    impl SchedulingTarget for NullTarget {
        fn enqueue_or_join(&self, task: NodeTask) -> TaskHandle {
            let (handle, completer) = crate::handle::pending(task.node);
            completer.complete(crate::handle::TaskOutcome::Success { bytes_transferred: task.length });
            handle
        }
    }

    fn seeded_state(dir: &std::path::Path, content_size: u64, chunk_size: u64) -> State {
        let shape = Shape::from_content_size(content_size, chunk_size).unwrap();
        let path = dir.join("r.mref");
        let mut file = calimero_merkle_store::TreeFile::create(&path, &shape).unwrap();
        let content = vec![0u8; content_size as usize];
        {
            let mut hashes = file.hashes_mut();
            for i in 0..shape.total_chunks() {
                let start = shape.chunk_start(i) as usize;
                let end = start + shape.actual_chunk_size(i) as usize;
                hashes.set(shape.chunk_index_to_leaf_node(i), MerkleHash::sha256(&content[start..end]));
            }
        }
        file.bitset().set_range(0, shape.node_count());
        file.flush().unwrap();
        drop(file);
        let reference = Reference::open(&path).unwrap();
        reference.into_state(dir.join("s.mrkl"), true).unwrap()
    }

    #[test]
    fn conservative_never_coalesces() {
        let dir = tempdir().unwrap();
        let shape = Shape::from_content_size(4 << 20, 1 << 20).unwrap();
        let state = seeded_state(dir.path(), 4 << 20, 1 << 20);

        let decisions = ConservativeScheduler.analyze(0, 4 << 20, shape, &state);
        let selected: Vec<_> = decisions.iter().filter(|d| d.reason != Reason::AlreadyValidSkip).collect();
        assert_eq!(selected.len(), 4);
        assert!(selected.iter().all(|d| d.reason == Reason::MinimalDownload));
    }

    #[test]
    fn aggressive_coalesces_whole_range_into_one_node() {
        let dir = tempdir().unwrap();
        let shape = Shape::from_content_size(4 << 20, 1 << 20).unwrap();
        let state = seeded_state(dir.path(), 4 << 20, 1 << 20);

        let decisions = AggressiveScheduler::default().analyze(0, 4 << 20, shape, &state);
        let selected: Vec<_> = decisions.iter().filter(|d| d.reason != Reason::AlreadyValidSkip).collect();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].reason, Reason::Coalesced);
        assert_eq!(selected[0].node, 0);
    }

    #[test]
    fn aggressive_respects_transport_limit() {
        let dir = tempdir().unwrap();
        let shape = Shape::from_content_size(4 << 20, 1 << 20).unwrap();
        let state = seeded_state(dir.path(), 4 << 20, 1 << 20);

        // Cap smaller than the full 4 MiB range: must split into the two
        // 2 MiB subtrees instead of one 4 MiB node.
        let scheduler = AggressiveScheduler::new(2 << 20);
        let decisions = scheduler.analyze(0, 4 << 20, shape, &state);
        let selected: Vec<_> = decisions.iter().filter(|d| d.reason != Reason::AlreadyValidSkip).collect();
        assert_eq!(selected.len(), 2);
        assert!(selected.iter().all(|d| d.reason == Reason::TransportLimitSplit));
    }

    #[test]
    fn already_valid_chunks_are_skipped() {
        let dir = tempdir().unwrap();
        let shape = Shape::from_content_size(4 << 20, 1 << 20).unwrap();
        let state = seeded_state(dir.path(), 4 << 20, 1 << 20);
        state.save_if_valid(0, &vec![0u8; 1 << 20], |_| Ok(())).unwrap();

        let decisions = ConservativeScheduler.analyze(0, 4 << 20, shape, &state);
        let skip = decisions.iter().find(|d| d.node == shape.chunk_index_to_leaf_node(0)).unwrap();
        assert_eq!(skip.reason, Reason::AlreadyValidSkip);

        // Mixed validity blocks coalescing the whole range, but the
        // still-fully-missing {chunk 2, chunk 3} subtree still coalesces.
        let decisions = AggressiveScheduler::default().analyze(0, 4 << 20, shape, &state);
        let selected: Vec<_> = decisions.iter().filter(|d| d.reason != Reason::AlreadyValidSkip).collect();
        assert_eq!(selected.len(), 2);
        assert_eq!(selected.iter().filter(|d| d.reason == Reason::MinimalDownload).count(), 1);
        assert_eq!(selected.iter().filter(|d| d.reason == Reason::Coalesced).count(), 1);
    }

    #[test]
    fn empty_content_never_schedules() {
        let shape = Shape::from_content_size(0, 1 << 20).unwrap();
        let dir = tempdir().unwrap();
        let state = seeded_state(dir.path(), 0, 1 << 20);
        assert!(ConservativeScheduler.analyze(0, 0, shape, &state).is_empty());
    }
}
