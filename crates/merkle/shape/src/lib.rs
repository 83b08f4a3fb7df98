//! Pure, allocation-free arithmetic over Merkle chunk-tree geometry.
//!
//! A [`Shape`] is derived once from a content size and a chunk size and is
//! `Copy`; every other component in this workspace treats it as a value type
//! rather than something to look up or cache.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Default chunk size: 1 MiB.
pub const DEFAULT_CHUNK_SIZE: u64 = 1 << 20;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ShapeError {
    #[error("chunk size {0} is zero")]
    ZeroChunkSize(u64),
    #[error("chunk size {0} is not a power of two")]
    ChunkSizeNotPowerOfTwo(u64),
}

/// Derived geometry of a Merkle tree over `content_size` bytes of content,
/// chunked at `chunk_size` bytes per leaf.
///
/// Node indices follow the standard array layout of a complete binary tree:
/// node `v`'s children are `2v+1` and `2v+2`; leaves occupy the contiguous
/// range `[leaf_offset, leaf_offset + leaf_capacity)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shape {
    chunk_size: u64,
    content_size: u64,
    total_chunks: u32,
    leaf_capacity: u32,
    internal_count: u32,
    node_count: u32,
    leaf_offset: u32,
}

impl Shape {
    /// Computes a [`Shape`] from a content size and chunk size.
    ///
    /// # Errors
    ///
    /// Returns [`ShapeError`] if `chunk_size` is zero or not a power of two.
    pub fn from_content_size(content_size: u64, chunk_size: u64) -> Result<Self, ShapeError> {
        if chunk_size == 0 {
            return Err(ShapeError::ZeroChunkSize(chunk_size));
        }
        if !chunk_size.is_power_of_two() {
            return Err(ShapeError::ChunkSizeNotPowerOfTwo(chunk_size));
        }

        let total_chunks = content_size.div_ceil(chunk_size);
        // Tree geometry is expressed in u32 node/chunk indices; this bounds
        // addressable content to chunk_size * 2^32 bytes, which at the
        // default 1 MiB chunk size is 4 PiB of content.
        let total_chunks = u32::try_from(total_chunks).unwrap_or(u32::MAX);

        let leaf_capacity = total_chunks.next_power_of_two();
        let internal_count = leaf_capacity - 1;
        let node_count = 2 * leaf_capacity - 1;
        let leaf_offset = internal_count;

        Ok(Self {
            chunk_size,
            content_size,
            total_chunks,
            leaf_capacity,
            internal_count,
            node_count,
            leaf_offset,
        })
    }

    #[must_use]
    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    #[must_use]
    pub fn content_size(&self) -> u64 {
        self.content_size
    }

    /// `C`: number of real (non-virtual) chunks/leaves.
    #[must_use]
    pub fn total_chunks(&self) -> u32 {
        self.total_chunks
    }

    /// `L`: leaf capacity, the next power of two at or above `total_chunks()`.
    #[must_use]
    pub fn leaf_capacity(&self) -> u32 {
        self.leaf_capacity
    }

    /// `I`: number of internal nodes, `L - 1`.
    #[must_use]
    pub fn internal_count(&self) -> u32 {
        self.internal_count
    }

    /// `V`: total node count, `2L - 1`.
    #[must_use]
    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    /// `O`: index of the first leaf node, equal to `internal_count()`.
    #[must_use]
    pub fn leaf_offset(&self) -> u32 {
        self.leaf_offset
    }

    /// The chunk index covering byte position `p`. Defined for `0 <= p < content_size`.
    #[must_use]
    pub fn chunk_index_for_position(&self, p: u64) -> u32 {
        u32::try_from(p / self.chunk_size).unwrap_or(u32::MAX)
    }

    /// Start byte offset of chunk `i`.
    #[must_use]
    pub fn chunk_start(&self, i: u32) -> u64 {
        u64::from(i) * self.chunk_size
    }

    /// Byte length of chunk `i`, accounting for a short final chunk.
    #[must_use]
    pub fn actual_chunk_size(&self, i: u32) -> u64 {
        let start = self.chunk_start(i);
        self.chunk_size.min(self.content_size.saturating_sub(start))
    }

    /// Maps a chunk index to its leaf node index.
    #[must_use]
    pub fn chunk_index_to_leaf_node(&self, i: u32) -> u32 {
        self.leaf_offset + i
    }

    /// Maps a leaf node index to its chunk index, if it is a *real* leaf
    /// (i.e. not one of the virtual padding leaves).
    #[must_use]
    pub fn leaf_node_to_chunk_index(&self, v: u32) -> Option<u32> {
        if !self.is_leaf_node(v) {
            return None;
        }
        let i = v - self.leaf_offset;
        (i < self.total_chunks).then_some(i)
    }

    #[must_use]
    pub fn is_leaf_node(&self, v: u32) -> bool {
        v >= self.leaf_offset
    }

    #[must_use]
    pub fn is_internal_node(&self, v: u32) -> bool {
        v < self.leaf_offset
    }

    /// Whether leaf node `v` is a virtual (zero-hash) padding leaf.
    ///
    /// Returns `false` for internal nodes and for real leaves.
    #[must_use]
    pub fn is_virtual_leaf(&self, v: u32) -> bool {
        self.is_leaf_node(v) && self.leaf_node_to_chunk_index(v).is_none()
    }

    /// Depth of node `v` in the complete binary tree, root at depth 0.
    fn node_depth(v: u32) -> u32 {
        let n = v + 1;
        31 - n.leading_zeros()
    }

    /// The contiguous, half-open leaf-index interval `[first, last)` covered
    /// by node `v`. For a leaf node this is `[i, i+1)`.
    #[must_use]
    pub fn leaf_range_for_node(&self, v: u32) -> (u32, u32) {
        let depth = Self::node_depth(v);
        let position = (v + 1) - (1 << depth);
        let leaves_covered = self.leaf_capacity >> depth;
        let first = position * leaves_covered;
        (first, first + leaves_covered)
    }

    /// The byte range `[start, end)` covered by node `v`, clamped to
    /// `[0, content_size)`. A node covering only virtual leaves yields an
    /// empty range at the end of the content.
    #[must_use]
    pub fn byte_range_for_node(&self, v: u32) -> (u64, u64) {
        let (first_leaf, last_leaf_excl) = self.leaf_range_for_node(v);
        let real_last = last_leaf_excl.min(self.total_chunks);
        if first_leaf >= real_last {
            return (self.content_size, self.content_size);
        }
        let start = self.chunk_start(first_leaf);
        let last_chunk = real_last - 1;
        let end = self.chunk_start(last_chunk) + self.actual_chunk_size(last_chunk);
        (start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn empty_content_is_a_single_virtual_leaf() {
        let shape = Shape::from_content_size(0, DEFAULT_CHUNK_SIZE).unwrap();
        assert_eq!(shape.total_chunks(), 0);
        assert_eq!(shape.leaf_capacity(), 1);
        assert_eq!(shape.internal_count(), 0);
        assert_eq!(shape.node_count(), 1);
        assert_eq!(shape.leaf_offset(), 0);
        assert!(shape.is_virtual_leaf(0));
    }

    #[test]
    fn ten_mib_over_one_mib_chunks() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        assert_eq!(shape.total_chunks(), 10);
        assert_eq!(shape.leaf_capacity(), 16);
        assert_eq!(shape.node_count(), 31);
        assert_eq!(shape.leaf_offset(), 15);
    }

    #[test]
    fn short_tail_chunk() {
        let s = 1 << 20;
        let shape = Shape::from_content_size(3 * s + 100, s as u64).unwrap();
        assert_eq!(shape.total_chunks(), 4);
        assert_eq!(shape.actual_chunk_size(3), 100);
        assert_eq!(shape.actual_chunk_size(0), s as u64);
        assert!(shape.is_virtual_leaf(shape.chunk_index_to_leaf_node(4)));
    }

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        assert_eq!(
            Shape::from_content_size(100, 3),
            Err(ShapeError::ChunkSizeNotPowerOfTwo(3))
        );
        assert_eq!(
            Shape::from_content_size(100, 0),
            Err(ShapeError::ZeroChunkSize(0))
        );
    }

    #[test]
    fn root_covers_all_chunks() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        assert_eq!(shape.leaf_range_for_node(0), (0, 16));
        let (start, end) = shape.byte_range_for_node(0);
        assert_eq!((start, end), (0, 10 << 20));
    }

    #[test]
    fn leaf_node_round_trip() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        for i in 0..shape.total_chunks() {
            let v = shape.chunk_index_to_leaf_node(i);
            assert!(shape.is_leaf_node(v));
            assert_eq!(shape.leaf_node_to_chunk_index(v), Some(i));
        }
    }

    proptest! {
        #[test]
        fn p1_node_count_identity(content_size in 0u64..(1u64 << 40), pow in 0u32..30) {
            let chunk_size = 1u64 << pow;
            let shape = Shape::from_content_size(content_size, chunk_size).unwrap();
            let expected_l = shape.total_chunks().next_power_of_two();
            prop_assert_eq!(shape.leaf_capacity(), expected_l);
            prop_assert_eq!(shape.node_count(), 2 * expected_l - 1);
            prop_assert_eq!(shape.leaf_offset(), expected_l - 1);
        }

        #[test]
        fn leaf_ranges_partition_the_capacity(content_size in 1u64..(1u64 << 30), pow in 0u32..20) {
            let chunk_size = 1u64 << pow;
            let shape = Shape::from_content_size(content_size, chunk_size).unwrap();
            let mut covered = 0u32;
            for i in 0..shape.total_chunks() {
                let v = shape.chunk_index_to_leaf_node(i);
                let (a, b) = shape.leaf_range_for_node(v);
                prop_assert_eq!(a, i);
                prop_assert_eq!(b, i + 1);
                covered += 1;
            }
            prop_assert_eq!(covered, shape.total_chunks());
        }
    }
}
