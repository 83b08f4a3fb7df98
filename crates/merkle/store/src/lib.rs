//! Memory-mapped persistence for Merkle hash trees.
//!
//! This crate owns the on-disk byte layout only: a fixed-width hash region,
//! a validity bitset, and a trailing footer. It knows nothing about
//! the Reference/State distinction — that capability split lives in
//! `calimero-merkle-tree`, built on top of [`TreeFile`].

pub mod bitset;
pub mod error;
pub mod footer;
pub mod hash;
pub mod hashstore;

use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use calimero_merkle_shape::Shape;
use memmap2::MmapMut;
use tracing::debug;

pub use bitset::Bitset;
pub use error::StoreError;
pub use footer::{Footer, FooterError, FOOTER_LEN};
pub use hash::MerkleHash;
pub use hashstore::{HashStore, HashStoreMut};

/// An open, memory-mapped tree file: hash region + bitset region + footer.
/// Exclusively owned by a single handle; dropping it unmaps the file.
#[derive(Debug)]
pub struct TreeFile {
    mmap: MmapMut,
    footer: Footer,
}

impl TreeFile {
    /// Creates a new tree file at `path` sized for `shape`, with every hash
    /// slot zeroed and no validity bits set. Callers (the builder, or State
    /// seeding) are responsible for populating hashes and bits afterward.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on any filesystem failure.
    pub fn create(path: impl AsRef<Path>, shape: &Shape) -> Result<Self, StoreError> {
        let footer = Footer::from_shape(shape);
        let total_len = total_len(&footer);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_len)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let footer_start = total_len as usize - FOOTER_LEN;
        mmap[footer_start..].copy_from_slice(&footer.encode());

        debug!(node_count = footer.node_count, total_len, "created tree file");
        Ok(Self { mmap, footer })
    }

    /// Opens an existing tree file, validating its footer and that the
    /// mapping is large enough to hold the hash and bitset regions the
    /// footer declares.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptFooter`] if the footer is malformed or
    /// internally inconsistent, or [`StoreError::CorruptHashRegion`] if the
    /// file is shorter than the footer demands.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let footer = Footer::read_from_tail(&mmap[..])?;

        let expected = total_len(&footer);
        let actual = mmap.len() as u64;
        if actual != expected {
            return Err(StoreError::CorruptHashRegion { expected, actual });
        }

        Ok(Self { mmap, footer })
    }

    /// Copies this tree file's bytes to `dest_path`, returning a freshly
    /// opened handle to the copy. Used to seed a State from a Reference
    /// without disturbing the source.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on any filesystem failure.
    pub fn copy_to(&self, dest_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        self.flush()?;
        std::fs::write(dest_path.as_ref(), &self.mmap[..])?;
        Self::open(dest_path)
    }

    #[must_use]
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    /// The [`Shape`] this file's footer describes.
    ///
    /// # Panics
    ///
    /// Never panics in practice: `open`/`create` already validated that the
    /// footer's shape fields are self-consistent.
    #[must_use]
    pub fn shape(&self) -> Shape {
        self.footer.shape().expect("shape validated at open/create")
    }

    fn hash_region_len(&self) -> usize {
        self.footer.node_count as usize * 32
    }

    #[must_use]
    pub fn hashes(&self) -> HashStore<'_> {
        let len = self.hash_region_len();
        HashStore::new(&self.mmap[..len])
    }

    pub fn hashes_mut(&mut self) -> HashStoreMut<'_> {
        let len = self.hash_region_len();
        HashStoreMut::new(&mut self.mmap[..len])
    }

    /// A bitset view over the validity region, backed by atomic per-byte
    /// operations. May be read and written
    /// concurrently from multiple threads holding only `&self`.
    #[must_use]
    pub fn bitset(&self) -> Bitset<'_> {
        let start = self.hash_region_len();
        let end = start + self.footer.bitset_bytes as usize;
        // SAFETY: [start, end) is disjoint from the hash region, and the only
        // other borrow that can alias it (`hashes_mut`) requires `&mut self`,
        // so it cannot coexist with this `&self` borrow.
        unsafe { Bitset::from_raw(&self.mmap[start..end], self.footer.node_count) }
    }

    /// Flushes the mapping to disk. Cache writes use their own fsync; this
    /// covers the hash region, bitset, and footer.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error on flush failure.
    pub fn flush(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

fn total_len(footer: &Footer) -> u64 {
    u64::from(footer.node_count) * 32 + u64::from(footer.bitset_bytes) + FOOTER_LEN as u64
}
