use calimero_merkle_store::StoreError;
use thiserror::Error;

/// Errors surfaced by the Reference/State tree facade.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TreeError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cache write failed: {0}")]
    CacheWrite(#[from] std::io::Error),

    #[error("chunk index {index} is out of range for {total} chunks")]
    LeafIndexOutOfRange { index: u32, total: u32 },

    /// A State has fewer than `total_count` valid real-leaf bits; it cannot
    /// be upgraded into a Reference.
    #[error("state has {valid_count} of {total_count} chunks valid; refusing to upgrade to a reference")]
    IncompleteState { valid_count: u32, total_count: u32 },

    /// The handle was used after [`crate::State::close`] /
    /// [`crate::Reference::close`] released its mapping.
    #[error("tree handle is closed")]
    Closed,
}
