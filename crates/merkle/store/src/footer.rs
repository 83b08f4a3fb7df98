use calimero_merkle_shape::Shape;
use thiserror::Error;

/// Fixed encoded width of a [`Footer`], including its trailing length byte.
pub const FOOTER_LEN: usize = 45;

#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FooterError {
    #[error("footer is {0} bytes, expected {FOOTER_LEN}")]
    WrongLength(usize),

    #[error("footer length byte is {found}, expected {FOOTER_LEN}")]
    WrongLengthByte { found: u8 },

    #[error("footer shape is inconsistent with declared node/leaf counts")]
    InconsistentShape,

    #[error("file too small ({file_len}) to contain hash region + bitset + footer ({expected})")]
    FileTooSmall { file_len: u64, expected: u64 },
}

/// Footer metadata stored at the tail of a tree file.
///
/// All integer fields are encoded big-endian; the final byte duplicates the
/// footer's own length so a reader can locate the footer from the file's
/// last byte alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    pub chunk_size: u64,
    pub content_size: u64,
    pub total_chunks: u32,
    pub leaf_count: u32,
    pub cap_leaf: u32,
    pub node_count: u32,
    pub leaf_offset: u32,
    pub internal_node_count: u32,
    pub bitset_bytes: u32,
}

impl Footer {
    #[must_use]
    pub fn from_shape(shape: &Shape) -> Self {
        let bitset_bytes = bitset_bytes_for(shape.node_count());
        Self {
            chunk_size: shape.chunk_size(),
            content_size: shape.content_size(),
            total_chunks: shape.total_chunks(),
            leaf_count: shape.total_chunks(),
            cap_leaf: shape.leaf_capacity(),
            node_count: shape.node_count(),
            leaf_offset: shape.leaf_offset(),
            internal_node_count: shape.internal_count(),
            bitset_bytes,
        }
    }

    /// Reconstructs the [`Shape`] this footer describes.
    ///
    /// # Errors
    ///
    /// Returns [`FooterError::InconsistentShape`] if the footer's derived
    /// fields don't match what `Shape::from_content_size` would produce for
    /// `chunk_size`/`content_size` (i.e. the footer was tampered with or
    /// written by an incompatible version).
    pub fn shape(&self) -> Result<Shape, FooterError> {
        let shape = Shape::from_content_size(self.content_size, self.chunk_size)
            .map_err(|_| FooterError::InconsistentShape)?;
        if shape.total_chunks() != self.total_chunks
            || shape.leaf_capacity() != self.cap_leaf
            || shape.node_count() != self.node_count
            || shape.leaf_offset() != self.leaf_offset
            || shape.internal_count() != self.internal_node_count
        {
            return Err(FooterError::InconsistentShape);
        }
        Ok(shape)
    }

    #[must_use]
    pub fn encode(&self) -> [u8; FOOTER_LEN] {
        let mut buf = [0u8; FOOTER_LEN];
        let mut offset = 0;

        macro_rules! put {
            ($value:expr, $width:expr) => {{
                buf[offset..offset + $width].copy_from_slice(&$value.to_be_bytes());
                offset += $width;
            }};
        }

        put!(self.chunk_size, 8);
        put!(self.content_size, 8);
        put!(self.total_chunks, 4);
        put!(self.leaf_count, 4);
        put!(self.cap_leaf, 4);
        put!(self.node_count, 4);
        put!(self.leaf_offset, 4);
        put!(self.internal_node_count, 4);
        put!(self.bitset_bytes, 4);

        debug_assert_eq!(offset, FOOTER_LEN - 1);
        buf[offset] = u8::try_from(FOOTER_LEN).expect("FOOTER_LEN fits in a byte");
        buf
    }

    /// Decodes a footer from an exact `FOOTER_LEN`-byte slice.
    ///
    /// # Errors
    ///
    /// Returns [`FooterError::WrongLength`] if `bytes.len() != FOOTER_LEN`,
    /// or [`FooterError::WrongLengthByte`] if the trailing length byte
    /// doesn't match `FOOTER_LEN`.
    pub fn decode(bytes: &[u8]) -> Result<Self, FooterError> {
        if bytes.len() != FOOTER_LEN {
            return Err(FooterError::WrongLength(bytes.len()));
        }
        let declared_len = bytes[FOOTER_LEN - 1];
        if usize::from(declared_len) != FOOTER_LEN {
            return Err(FooterError::WrongLengthByte { found: declared_len });
        }

        let mut offset = 0;
        macro_rules! take {
            ($ty:ty, $width:expr) => {{
                let mut tmp = [0u8; $width];
                tmp.copy_from_slice(&bytes[offset..offset + $width]);
                offset += $width;
                <$ty>::from_be_bytes(tmp)
            }};
        }

        let chunk_size = take!(u64, 8);
        let content_size = take!(u64, 8);
        let total_chunks = take!(u32, 4);
        let leaf_count = take!(u32, 4);
        let cap_leaf = take!(u32, 4);
        let node_count = take!(u32, 4);
        let leaf_offset = take!(u32, 4);
        let internal_node_count = take!(u32, 4);
        let bitset_bytes = take!(u32, 4);

        Ok(Self {
            chunk_size,
            content_size,
            total_chunks,
            leaf_count,
            cap_leaf,
            node_count,
            leaf_offset,
            internal_node_count,
            bitset_bytes,
        })
    }

    /// Locates and decodes the footer at the tail of a full tree-file byte
    /// slice, validating the hash-region and bitset-region lengths implied
    /// by the footer against the file's actual length.
    ///
    /// # Errors
    ///
    /// See [`FooterError`] variants.
    pub fn read_from_tail(file: &[u8]) -> Result<Self, FooterError> {
        let file_len = file.len();
        if file_len == 0 {
            return Err(FooterError::WrongLength(0));
        }
        let declared_len = file[file_len - 1];
        if usize::from(declared_len) != FOOTER_LEN {
            return Err(FooterError::WrongLengthByte { found: declared_len });
        }
        if file_len < FOOTER_LEN {
            return Err(FooterError::WrongLength(file_len));
        }
        let footer_start = file_len - FOOTER_LEN;
        let footer = Self::decode(&file[footer_start..])?;

        let hash_region = u64::from(footer.node_count) * 32;
        let expected = hash_region + u64::from(footer.bitset_bytes) + FOOTER_LEN as u64;
        if expected != file_len as u64 {
            return Err(FooterError::FileTooSmall {
                file_len: file_len as u64,
                expected,
            });
        }

        footer.shape()?;
        Ok(footer)
    }
}

/// Bitset byte count for `node_count` nodes, rounded up to an 8-byte word
/// boundary so the atomic bitset view never needs a
/// partial trailing word.
#[must_use]
pub fn bitset_bytes_for(node_count: u32) -> u32 {
    let bits = u64::from(node_count);
    let bytes = bits.div_ceil(8);
    let words = bytes.div_ceil(8);
    u32::try_from(words * 8).expect("bitset size fits in u32 for any realistic tree")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        let footer = Footer::from_shape(&shape);
        let encoded = footer.encode();
        assert_eq!(encoded.len(), FOOTER_LEN);
        let decoded = Footer::decode(&encoded).unwrap();
        assert_eq!(footer, decoded);
    }

    #[test]
    fn rejects_wrong_length_byte() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        let mut encoded = Footer::from_shape(&shape).encode();
        *encoded.last_mut().unwrap() = 0;
        assert_eq!(
            Footer::decode(&encoded),
            Err(FooterError::WrongLengthByte { found: 0 })
        );
    }

    #[test]
    fn read_from_tail_validates_file_length() {
        let shape = Shape::from_content_size(10 << 20, 1 << 20).unwrap();
        let footer = Footer::from_shape(&shape);
        let mut file = vec![0u8; footer.node_count as usize * 32 + footer.bitset_bytes as usize];
        file.extend_from_slice(&footer.encode());
        assert_eq!(Footer::read_from_tail(&file).unwrap(), footer);

        file.pop();
        assert!(Footer::read_from_tail(&file).is_err());
    }
}
