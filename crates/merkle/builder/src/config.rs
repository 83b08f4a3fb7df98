use calimero_merkle_shape::DEFAULT_CHUNK_SIZE;

/// Tunables for a [`crate::Builder`] run. Plain data; parsing these from
/// CLI args or a config file is an embedding application's concern.
#[derive(Debug, Clone, Copy)]
pub struct BuilderConfig {
    pub chunk_size: u64,
    /// Number of worker threads used to hash leaves in parallel. Clamped to
    /// at least 1 and at most the content's chunk count at build time.
    pub leaf_hash_threads: usize,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            leaf_hash_threads: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
        }
    }
}
