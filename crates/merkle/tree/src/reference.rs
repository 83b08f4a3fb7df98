use std::path::{Path, PathBuf};

use calimero_merkle_shape::Shape;
use calimero_merkle_store::{MerkleHash, StoreError, TreeFile};

use crate::error::TreeError;
use crate::path_to_root_from;
use crate::state::State;

/// A read-only view over a Merkle tree whose hashes are the authoritative
/// digests of the underlying content.
///
/// Conventionally backed by a `.mref` file, though the on-disk layout is
/// identical to a [`State`]'s `.mrkl` file.
#[derive(Debug)]
pub struct Reference {
    file: TreeFile,
    path: PathBuf,
}

impl Reference {
    /// Opens an existing Reference tree file.
    ///
    /// # Errors
    ///
    /// See [`TreeError`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TreeError> {
        let path = path.as_ref().to_path_buf();
        let file = TreeFile::open(&path)?;
        Ok(Self { file, path })
    }

    pub(crate) fn from_parts(file: TreeFile, path: PathBuf) -> Self {
        Self { file, path }
    }

    pub(crate) fn file(&self) -> &TreeFile {
        &self.file
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        self.file.shape()
    }

    /// Returns the reference digest for chunk `chunk_index`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] if `chunk_index >=
    /// shape().total_chunks()`.
    pub fn hash_for_leaf(&self, chunk_index: u32) -> Result<MerkleHash, TreeError> {
        let shape = self.shape();
        if chunk_index >= shape.total_chunks() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: chunk_index,
                total: shape.total_chunks(),
            });
        }
        Ok(self.file.hashes().get(shape.chunk_index_to_leaf_node(chunk_index)))
    }

    /// The chain of hashes from the leaf at `chunk_index` to the root,
    /// inclusive of both endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::LeafIndexOutOfRange`] if `chunk_index >=
    /// shape().total_chunks()`.
    pub fn path_to_root(&self, chunk_index: u32) -> Result<Vec<MerkleHash>, TreeError> {
        let shape = self.shape();
        if chunk_index >= shape.total_chunks() {
            return Err(TreeError::LeafIndexOutOfRange {
                index: chunk_index,
                total: shape.total_chunks(),
            });
        }
        Ok(path_to_root_from(&self.file, shape.chunk_index_to_leaf_node(chunk_index)))
    }

    /// Seeds a [`State`] at `state_path` from this Reference by copying the
    /// hash region and clearing real-leaf validity bits. When `keep_source`
    /// is `false`, this Reference's backing file is removed after the copy,
    /// converting the `.mref` in place into a `.mrkl`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::Store`] if the copy or (when discarding) the
    /// removal of the source file fails.
    pub fn into_state(self, state_path: impl AsRef<Path>, keep_source: bool) -> Result<State, TreeError> {
        let state = State::seed_from_reference(&self.file, state_path.as_ref())?;
        drop(self.file);
        if !keep_source {
            std::fs::remove_file(&self.path).map_err(StoreError::Io)?;
        }
        Ok(state)
    }

    /// Flushes and releases the mapping. Further use of this handle is a
    /// compile-time impossibility since `close` consumes `self`.
    pub fn close(self) {
        drop(self.file);
    }
}
