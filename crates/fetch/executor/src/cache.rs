use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

/// The local, possibly-sparse cache file chunks are persisted into. Supports
/// concurrent, non-overlapping positional
/// writes: every worker writes a disjoint chunk range, so no locking is
/// needed around the file handle itself.
#[derive(Debug, Clone)]
pub struct LocalCache {
    file: Arc<File>,
}

impl LocalCache {
    /// Opens (creating if necessary) the cache file at `path`, truncating
    /// or extending it to `logical_len` bytes. The engine never shrinks or
    /// relocates this file after creation.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on open or resize failure.
    pub fn open_or_create(path: impl AsRef<Path>, logical_len: u64) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).create(true).open(path)?;
        file.set_len(logical_len)?;
        Ok(Self { file: Arc::new(file) })
    }

    /// Writes `data` at `offset` and fsyncs the data before returning, so
    /// that a reader observing the corresponding validity bit set is
    /// guaranteed to see this write.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on write or fsync failure.
    pub fn write_at(&self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.file.write_all_at(data, offset)?;
        self.file.sync_data()
    }

    /// Reads `len` bytes at `offset`, for the channel facade's final
    /// cache-to-caller copy.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on short read or other failure.
    pub fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let cache = LocalCache::open_or_create(dir.path().join("cache.bin"), 1 << 20).unwrap();
        cache.write_at(10, b"hello").unwrap();
        assert_eq!(cache.read_at(10, 5).unwrap(), b"hello");
    }

    #[test]
    fn disjoint_concurrent_writes_do_not_clobber() {
        let dir = tempdir().unwrap();
        let cache = LocalCache::open_or_create(dir.path().join("cache.bin"), 8);
        let cache = cache.unwrap();
        std::thread::scope(|scope| {
            let a = cache.clone();
            let b = cache.clone();
            scope.spawn(move || a.write_at(0, b"AAAA").unwrap());
            scope.spawn(move || b.write_at(4, b"BBBB").unwrap());
        });
        assert_eq!(cache.read_at(0, 8).unwrap(), b"AAAABBBB");
    }
}
