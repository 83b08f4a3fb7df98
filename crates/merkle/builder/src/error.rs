use thiserror::Error;

use calimero_merkle_shape::ShapeError;
use calimero_merkle_store::StoreError;

/// Errors surfaced while building a Reference tree from a local content file.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BuilderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Shape(#[from] ShapeError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("leaf hashing worker panicked: {0}")]
    WorkerPanic(String),
}
