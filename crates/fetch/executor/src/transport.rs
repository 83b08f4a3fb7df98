use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// External fetch contract the executor consumes.
/// May be called concurrently, up to the executor's configured concurrency.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns exactly `length` bytes starting at `start`, or an error.
    async fn fetch_range(&self, start: u64, length: u64) -> Result<Bytes, TransportError>;
}

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum TransportError {
    #[error("{0}")]
    Other(String),
}

/// A [`Transport`] serving byte ranges from a local file, standing in for a
/// real HTTP origin. Used in tests and for embedding against a source that
/// is already on local disk (e.g. a pre-synced mirror).
#[derive(Debug, Clone)]
pub struct LocalFileTransport {
    path: PathBuf,
}

impl LocalFileTransport {
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }
}

#[async_trait]
impl Transport for LocalFileTransport {
    async fn fetch_range(&self, start: u64, length: u64) -> Result<Bytes, TransportError> {
        use std::os::unix::fs::FileExt;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&path).map_err(|e| TransportError::Other(e.to_string()))?;
            let mut buf = vec![0u8; length as usize];
            file.read_exact_at(&mut buf, start).map_err(|e| TransportError::Other(e.to_string()))?;
            Ok(Bytes::from(buf))
        })
        .await
        .map_err(|e| TransportError::Other(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn reads_requested_range() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("content.bin");
        std::fs::write(&path, b"0123456789").unwrap();

        let transport = LocalFileTransport::new(&path);
        let bytes = transport.fetch_range(3, 4).await.unwrap();
        assert_eq!(&bytes[..], b"3456");
    }
}
