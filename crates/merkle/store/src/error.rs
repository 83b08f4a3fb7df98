use std::io;

use thiserror::Error;

use crate::footer::FooterError;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupt footer: {0}")]
    CorruptFooter(#[from] FooterError),

    #[error("hash region is truncated: expected {expected} bytes, mapping has {actual}")]
    CorruptHashRegion { expected: u64, actual: u64 },
}
