use crate::hash::MerkleHash;

const HASH_WIDTH: usize = 32;

/// A read-only view over the hash region: `node_count` fixed-width 32-byte
/// slots, `node_index -> slot`.
#[derive(Debug, Clone, Copy)]
pub struct HashStore<'a> {
    bytes: &'a [u8],
}

impl<'a> HashStore<'a> {
    /// # Panics
    ///
    /// Panics if `bytes.len()` is not a multiple of 32.
    #[must_use]
    pub fn new(bytes: &'a [u8]) -> Self {
        assert_eq!(bytes.len() % HASH_WIDTH, 0, "hash region misaligned");
        Self { bytes }
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        (self.bytes.len() / HASH_WIDTH) as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn get(&self, v: u32) -> MerkleHash {
        let slot = self.slot(v);
        let mut buf = [0u8; HASH_WIDTH];
        buf.copy_from_slice(slot);
        MerkleHash::from_bytes(buf)
    }

    fn slot(&self, v: u32) -> &[u8] {
        let start = v as usize * HASH_WIDTH;
        &self.bytes[start..start + HASH_WIDTH]
    }
}

/// A mutable view over the hash region, used only by the builder and by
/// State seeding. Concurrent writers must address disjoint
/// node indices; this type does not itself synchronize access.
#[derive(Debug)]
pub struct HashStoreMut<'a> {
    bytes: &'a mut [u8],
}

impl<'a> HashStoreMut<'a> {
    /// # Panics
    ///
    /// Panics if `bytes.len()` is not a multiple of 32.
    #[must_use]
    pub fn new(bytes: &'a mut [u8]) -> Self {
        assert_eq!(bytes.len() % HASH_WIDTH, 0, "hash region misaligned");
        Self { bytes }
    }

    #[must_use]
    pub fn len(&self) -> u32 {
        (self.bytes.len() / HASH_WIDTH) as u32
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn get(&self, v: u32) -> MerkleHash {
        let start = v as usize * HASH_WIDTH;
        let mut buf = [0u8; HASH_WIDTH];
        buf.copy_from_slice(&self.bytes[start..start + HASH_WIDTH]);
        MerkleHash::from_bytes(buf)
    }

    pub fn set(&mut self, v: u32, hash: MerkleHash) {
        let start = v as usize * HASH_WIDTH;
        self.bytes[start..start + HASH_WIDTH].copy_from_slice(hash.as_bytes());
    }

    #[must_use]
    pub fn as_immutable(&self) -> HashStore<'_> {
        HashStore::new(self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_set_round_trip() {
        let mut buf = vec![0u8; 64];
        let mut store = HashStoreMut::new(&mut buf);
        let h = MerkleHash::sha256(b"leaf 0");
        store.set(0, h);
        assert_eq!(store.get(0), h);
        assert_eq!(store.get(1), MerkleHash::ZERO);
        assert_eq!(store.as_immutable().get(0), h);
    }
}
