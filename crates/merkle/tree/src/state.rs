use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use calimero_merkle_shape::Shape;
use calimero_merkle_store::{FooterError, MerkleHash, StoreError, TreeFile};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::TreeError;
use crate::path_to_root_from;
use crate::reference::Reference;

/// Number of striped locks guarding the check-then-write-then-set critical
/// section of [`State::save_if_valid`]. Distinct leaves usually hash
/// to distinct stripes and proceed without contending; only a same-leaf race
/// serializes on the same stripe.
const WRITE_LOCK_STRIPES: usize = 64;

struct StateInner {
    file: TreeFile,
    path: PathBuf,
    write_locks: Vec<Mutex<()>>,
    closed: AtomicBool,
}

/// A mutable, concurrency-safe view over a Merkle tree tracking which
/// chunks have been verified and cached locally.
///
/// Cloning a [`State`] shares the same underlying mapping; all clones
/// observe each other's writes (they are handles to one tree, not copies of
/// one).
#[derive(Clone)]
pub struct State {
    inner: Arc<StateInner>,
}

impl std::fmt::Debug for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("State").field("path", &self.inner.path).finish()
    }
}

impl State {
    /// Opens a previously seeded State file without cross-checking it
    /// against a companion Reference. Prefer [`State::open_resuming`] when a
    /// Reference is available.
    ///
    /// # Errors
    ///
    /// See [`TreeError`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TreeError> {
        let path = path.as_ref().to_path_buf();
        let file = TreeFile::open(&path)?;
        Ok(Self::from_parts(file, path))
    }

    /// Re-opens a previously seeded State file, rejecting it with
    /// `CorruptFooter` if its footer is inconsistent with `reference`'s: a
    /// State built against a different chunk size or content size than its
    /// companion Reference cannot be trusted to resume correctly, so
    /// resuming is refused rather than silently allowed.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Store`] wrapping [`calimero_merkle_store::StoreError::CorruptFooter`]
    /// on a footer mismatch, or any error from opening the file.
    pub fn open_resuming(path: impl AsRef<Path>, reference: &Reference) -> Result<Self, TreeError> {
        let path = path.as_ref().to_path_buf();
        let file = TreeFile::open(&path)?;
        if file.footer() != reference.file().footer() {
            warn!(?path, "state footer does not match reference footer; refusing to resume");
            return Err(TreeError::Store(StoreError::CorruptFooter(FooterError::InconsistentShape)));
        }
        Ok(Self::from_parts(file, path))
    }

    pub(crate) fn seed_from_reference(reference_file: &TreeFile, state_path: &Path) -> Result<Self, TreeError> {
        let mut state_file = reference_file.copy_to(state_path)?;
        let shape = state_file.shape();
        state_file
            .bitset()
            .clear_range(shape.leaf_offset(), shape.leaf_offset() + shape.total_chunks());
        state_file.flush().map_err(StoreError::Io)?;
        debug!(?state_path, total_chunks = shape.total_chunks(), "seeded state from reference");
        Ok(Self::from_parts(state_file, state_path.to_path_buf()))
    }

    fn from_parts(file: TreeFile, path: PathBuf) -> Self {
        let write_locks = (0..WRITE_LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        Self {
            inner: Arc::new(StateInner {
                file,
                path,
                write_locks,
                closed: AtomicBool::new(false),
            }),
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.inner.file.shape()
    }

    /// True iff chunk `chunk_index`'s real-leaf validity bit is set. Out of
    /// range indices are reported as invalid rather than erroring, matching
    /// the scheduler's use of this as a simple predicate.
    #[must_use]
    pub fn is_valid(&self, chunk_index: u32) -> bool {
        let shape = self.shape();
        chunk_index < shape.total_chunks()
            && self.inner.file.bitset().get(shape.chunk_index_to_leaf_node(chunk_index))
    }

    /// An immutable snapshot of the validity bitset, suitable for reporting.
    #[must_use]
    pub fn valid_chunks(&self) -> Vec<u8> {
        self.inner.file.bitset().snapshot()
    }

    /// The reference digest for chunk `chunk_index`, read from this State's
    /// own hash region (identical to the seeding Reference's, by
    /// construction; see module docs on "internal-node hash caching").
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] if out of range.
    pub fn hash_for_leaf(&self, chunk_index: u32) -> Result<MerkleHash, TreeError> {
        let shape = self.shape();
        if chunk_index >= shape.total_chunks() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: chunk_index,
                total: shape.total_chunks(),
            });
        }
        Ok(self.inner.file.hashes().get(shape.chunk_index_to_leaf_node(chunk_index)))
    }

    /// The chain of hashes from the leaf at `chunk_index` to the root. This
    /// is never computed incrementally as chunks complete; it is always read
    /// back from the hash region that was copied wholesale from the
    /// Reference at seed time, which is immutable after seeding.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] if out of range.
    pub fn path_to_root(&self, chunk_index: u32) -> Result<Vec<MerkleHash>, TreeError> {
        let shape = self.shape();
        if chunk_index >= shape.total_chunks() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: chunk_index,
                total: shape.total_chunks(),
            });
        }
        Ok(path_to_root_from(&self.inner.file, shape.chunk_index_to_leaf_node(chunk_index)))
    }

    /// Verifies `payload` against the reference hash for `chunk_index`, and
    /// if it matches, durably persists it (via `write_sink`) before marking
    /// the chunk valid.
    ///
    /// The hash comparison always runs; only the check-already-valid /
    /// write / set-bit sequence is serialized per leaf, so two concurrent
    /// calls for the same `chunk_index` never both invoke `write_sink`.
    /// Calls for distinct indices never contend with each other beyond
    /// incidental stripe collisions.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] if out of range, or
    /// [`TreeError::CacheWrite`] if `write_sink` fails (the validity bit is
    /// left unset in that case).
    pub fn save_if_valid<F>(&self, chunk_index: u32, payload: &[u8], write_sink: F) -> Result<bool, TreeError>
    where
        F: FnOnce(&[u8]) -> std::io::Result<()>,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(TreeError::Closed);
        }
        let shape = self.shape();
        if chunk_index >= shape.total_chunks() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: chunk_index,
                total: shape.total_chunks(),
            });
        }
        let node = shape.chunk_index_to_leaf_node(chunk_index);

        let expected = self.inner.file.hashes().get(node);
        let actual = MerkleHash::sha256(payload);
        if actual != expected {
            warn!(chunk_index, "hash mismatch; rejecting chunk");
            return Ok(false);
        }

        let stripe = &self.inner.write_locks[node as usize % self.inner.write_locks.len()];
        let _guard = stripe.lock();

        if self.inner.file.bitset().get(node) {
            // Another caller already verified and wrote this chunk; skip the
            // redundant write.
            return Ok(true);
        }

        write_sink(payload).map_err(StoreError::Io)?;
        self.inner.file.bitset().set(node);
        debug!(chunk_index, "chunk verified and persisted");
        Ok(true)
    }

    /// Attempts to upgrade this State into a [`Reference`], requiring every
    /// real-leaf validity bit to be set.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::IncompleteState`] if any chunk is still
    /// unverified.
    pub fn into_reference(self) -> Result<Reference, TreeError> {
        let shape = self.shape();
        let valid_count = (0..shape.total_chunks()).filter(|&i| self.is_valid(i)).count() as u32;
        if valid_count != shape.total_chunks() {
            return Err(TreeError::IncompleteState {
                valid_count,
                total_count: shape.total_chunks(),
            });
        }
        let path = self.inner.path.clone();
        drop(self);
        let file = TreeFile::open(&path)?;
        Ok(Reference::from_parts(file, path))
    }

    /// Marks this handle closed: subsequent calls through it (and any
    /// clones) fail with [`TreeError::Closed`], and flushes the mapping.
    /// Because [`State`] is cloneable, this affects every clone, not just
    /// `self`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the flush fails.
    pub fn close(&self) -> Result<(), TreeError> {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.file.flush().map_err(StoreError::Io)?;
        Ok(())
    }
}
