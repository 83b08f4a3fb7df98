//! Reference and State views over a single persisted Merkle tree layout.
//!
//! The Reference/State split is a capability distinction over one on-disk
//! format (`calimero_merkle_store::TreeFile`), not two data models: a
//! [`Reference`] exposes read-only verification, a [`State`] additionally
//! tracks per-chunk download progress and exposes [`State::save_if_valid`].

#![forbid(unsafe_code)]

mod error;
mod reference;
mod state;

pub use calimero_merkle_shape::Shape;
pub use calimero_merkle_store::MerkleHash;
pub use error::TreeError;
pub use reference::Reference;
pub use state::State;

use calimero_merkle_store::TreeFile;

/// Walks from leaf node `node` to the root, collecting hashes along the way.
/// The hash region is identical for a Reference and any State seeded from
/// it, so this single helper backs both facades.
fn path_to_root_from(file: &TreeFile, mut node: u32) -> Vec<MerkleHash> {
    let hashes = file.hashes();
    let mut path = vec![hashes.get(node)];
    while node != 0 {
        node = (node - 1) / 2;
        path.push(hashes.get(node));
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;
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
        Reference::from_parts(file, path)
    }

    #[test]
    fn hash_for_leaf_matches_content() {
        let dir = tempdir().unwrap();
        let content = vec![7u8; 3 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        assert_eq!(
            reference.hash_for_leaf(1).unwrap(),
            MerkleHash::sha256(&content[1 << 20..2 << 20])
        );
    }

    #[test]
    fn path_to_root_length_matches_depth() {
        let dir = tempdir().unwrap();
        let content = vec![1u8; 10 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        // shape: C=10, L=16, depth of a leaf = log2(16) = 4, path length 5.
        assert_eq!(reference.path_to_root(0).unwrap().len(), 5);
    }

    #[test]
    fn seed_then_save_if_valid_tracks_progress() {
        let dir = tempdir().unwrap();
        let content = vec![9u8; 4 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state_path = dir.path().join("s.mrkl");
        let state = reference.into_state(&state_path, true).unwrap();

        assert!(!state.is_valid(0));
        let chunk0 = &content[0..1 << 20];
        let ok = state.save_if_valid(0, chunk0, |_bytes| Ok(())).unwrap();
        assert!(ok);
        assert!(state.is_valid(0));
        assert!(!state.is_valid(1));
    }

    #[test]
    fn save_if_valid_rejects_tampered_bytes() {
        let dir = tempdir().unwrap();
        let content = vec![9u8; 2 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();

        let mut tampered = content[0..1 << 20].to_vec();
        tampered[0] ^= 0xFF;
        let mut write_count = 0;
        let ok = state
            .save_if_valid(0, &tampered, |_| {
                write_count += 1;
                Ok(())
            })
            .unwrap();
        assert!(!ok);
        assert_eq!(write_count, 0);
        assert!(!state.is_valid(0));
    }

    #[test]
    fn into_reference_requires_full_completion() {
        let dir = tempdir().unwrap();
        let content = vec![3u8; 2 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();

        let err = state.clone().into_reference().unwrap_err();
        assert!(matches!(err, TreeError::IncompleteState { .. }));

        for i in 0..state.shape().total_chunks() {
            let start = (i as u64 * (1 << 20)) as usize;
            let end = start + (1 << 20);
            state.save_if_valid(i, &content[start..end], |_| Ok(())).unwrap();
        }
        assert!(state.into_reference().is_ok());
    }

    #[test]
    fn closed_state_rejects_further_saves() {
        let dir = tempdir().unwrap();
        let content = vec![5u8; 1 << 20];
        let reference = build_reference(dir.path(), &content, 1 << 20);
        let state = reference.into_state(dir.path().join("s.mrkl"), true).unwrap();
        state.close().unwrap();
        let err = state.save_if_valid(0, &content, |_| Ok(())).unwrap_err();
        assert!(matches!(err, TreeError::Closed));
    }
}
