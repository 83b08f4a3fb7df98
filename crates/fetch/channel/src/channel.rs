use std::sync::Arc;

use calimero_fetch_executor::{InFlightRegistry, LocalCache};
use calimero_fetch_scheduler::{Scheduler, TaskOutcome};
use calimero_merkle_shape::Shape;
use calimero_merkle_tree::State;
use tracing::instrument;

use crate::error::ChannelError;

/// Presents a positional, content-addressed read surface over a
/// [`State`]: every [`Channel::read`] triggers scheduling for the
/// requested range and awaits the resulting node handles before copying
/// verified bytes out of the local cache.
///
/// Cloning a [`Channel`] is cheap and shares the same underlying state,
/// registry and cache; multiple readers may issue concurrent reads and
/// will de-duplicate overlapping downloads through the shared registry.
#[derive(Clone)]
pub struct Channel {
    shape: Shape,
    state: State,
    scheduler: Arc<dyn Scheduler>,
    registry: Arc<InFlightRegistry>,
    cache: LocalCache,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("content_size", &self.shape.content_size())
            .field("in_flight", &self.registry.in_flight_count())
            .finish()
    }
}

impl Channel {
    /// Builds a channel over `state`, scheduling downloads through
    /// `scheduler` and `registry`, and reading back verified bytes from
    /// `cache`.
    #[must_use]
    pub fn new(state: State, scheduler: Arc<dyn Scheduler>, registry: Arc<InFlightRegistry>, cache: LocalCache) -> Self {
        let shape = state.shape();
        Self {
            shape,
            state,
            scheduler,
            registry,
            cache,
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.shape
    }

    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.shape.content_size()
    }

    /// Reads up to `dest.len()` bytes starting at `file_position`, blocking
    /// (asynchronously) until every chunk the range touches has been
    /// downloaded and verified.
    ///
    /// Per §4.7: a `file_position` at or beyond the content size yields `0`
    /// bytes without scheduling anything. The scheduler's own node
    /// selection already never emits a task wider than its configured
    /// transport limit (it recurses into children instead), so no
    /// additional segmentation is needed here regardless of how large
    /// `dest` is.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Task`] with the first failure observed among
    /// the awaited node handles, or [`ChannelError::CacheRead`] if the final
    /// cache-to-caller copy fails.
    #[instrument(skip(self, dest), fields(content_size = self.shape.content_size()))]
    pub async fn read(&self, dest: &mut [u8], file_position: u64) -> Result<usize, ChannelError> {
        let content_size = self.shape.content_size();
        if file_position >= content_size || dest.is_empty() {
            return Ok(0);
        }
        let length = (dest.len() as u64).min(content_size - file_position);

        let handles = self.scheduler.schedule_downloads(
            file_position,
            length,
            self.shape,
            &self.state,
            self.registry.as_ref(),
        );

        for handle in handles {
            match handle.wait().await {
                TaskOutcome::Success { .. } => {}
                TaskOutcome::Failure(failure) => return Err(ChannelError::Task(failure)),
            }
        }

        let bytes = self
            .cache
            .read_at(file_position, length as usize)
            .map_err(|err| ChannelError::CacheRead(err.to_string()))?;
        dest[..bytes.len()].copy_from_slice(&bytes);
        Ok(bytes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calimero_fetch_executor::{Executor, ExecutorConfig, LocalFileTransport};
    use calimero_fetch_scheduler::{AggressiveScheduler, ConservativeScheduler};
    use calimero_merkle_store::{MerkleHash, TreeFile};
    use calimero_merkle_tree::Reference;
    use std::time::Duration;
    use tempfile::tempdir;

    fn build_reference(dir: &std::path::Path, content: &[u8], chunk_size: u64) -> Reference {
        let shape = Shape::from_content_size(content.len() as u64, chunk_size).unwrap();
        let path = dir.join("r.mref");
        let mut file = TreeFile::create(&path, &shape).unwrap();
        {
            let mut hashes = file.hashes_mut();
            for i in 0..shape.total_chunks() {
                let start = shape.chunk_start(i) as usize;
                let end = start + shape.actual_chunk_size(i) as usize;
                hashes.set(shape.chunk_index_to_leaf_node(i), MerkleHash::sha256(&content[start..end]));
            }
            for v in (shape.leaf_offset() + shape.total_chunks())..shape.node_count() {
                hashes.set(v, MerkleHash::ZERO);
            }
            for v in (0..shape.internal_count()).rev() {
                let left = hashes.get(2 * v + 1);
                let right = hashes.get(2 * v + 2);
                hashes.set(v, MerkleHash::combine(&left, &right));
            }
        }
        file.bitset().set_range(0, shape.node_count());
        file.flush().unwrap();
        drop(file);
        Reference::open(&path).unwrap()
    }

    #[tokio::test]
    async fn read_downloads_verifies_and_returns_bytes() {
        let dir = tempdir().unwrap();
        let content: Vec<u8> = (0..(4 << 20)).map(|i| (i % 253) as u8).collect();
        std::fs::write(dir.path().join("origin.bin"), &content).unwrap();

        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();

        let registry = InFlightRegistry::new(64);
        let cache = LocalCache::open_or_create(dir.path().join("cache.bin"), content.len() as u64).unwrap();
        let transport = Arc::new(LocalFileTransport::new(dir.path().join("origin.bin")));
        let executor = Executor::spawn(
            Arc::clone(&registry),
            state.clone(),
            transport,
            cache.clone(),
            ExecutorConfig::default(),
        );

        let channel = Channel::new(state, Arc::new(ConservativeScheduler), registry, cache);
        let mut buf = vec![0u8; 1 << 20];
        let n = channel.read(&mut buf, 0).await.unwrap();
        assert_eq!(n, 1 << 20);
        assert_eq!(buf, content[0..1 << 20]);

        executor.shutdown(Duration::from_secs(5)).await;
    }

    #[tokio::test]
    async fn read_past_end_of_content_returns_zero() {
        let dir = tempdir().unwrap();
        let content = vec![1u8; 1 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();

        let registry = InFlightRegistry::new(8);
        let cache = LocalCache::open_or_create(dir.path().join("cache.bin"), content.len() as u64).unwrap();
        let channel = Channel::new(state, Arc::new(AggressiveScheduler::default()), registry, cache);

        let mut buf = vec![0u8; 16];
        let n = channel.read(&mut buf, content.len() as u64).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn duplicate_concurrent_reads_deduplicate_through_registry() {
        let dir = tempdir().unwrap();
        let content: Vec<u8> = (0..(1 << 20)).map(|i| (i % 199) as u8).collect();
        std::fs::write(dir.path().join("origin.bin"), &content).unwrap();

        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();

        let registry = InFlightRegistry::new(8);
        let cache = LocalCache::open_or_create(dir.path().join("cache.bin"), content.len() as u64).unwrap();
        let transport = Arc::new(LocalFileTransport::new(dir.path().join("origin.bin")));
        let executor = Executor::spawn(
            Arc::clone(&registry),
            state.clone(),
            transport,
            cache.clone(),
            ExecutorConfig::default(),
        );

        let channel_a = Channel::new(state.clone(), Arc::new(ConservativeScheduler), Arc::clone(&registry), cache.clone());
        let channel_b = Channel::new(state, Arc::new(ConservativeScheduler), registry, cache);

        let mut buf_a = vec![0u8; 1 << 20];
        let mut buf_b = vec![0u8; 1 << 20];
        let (a, b) = tokio::join!(channel_a.read(&mut buf_a, 0), channel_b.read(&mut buf_b, 0));
        assert_eq!(a.unwrap(), 1 << 20);
        assert_eq!(b.unwrap(), 1 << 20);
        assert_eq!(buf_a, buf_b);

        executor.shutdown(Duration::from_secs(5)).await;
    }
}
