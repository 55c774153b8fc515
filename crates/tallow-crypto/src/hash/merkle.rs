//! Root hash over ordered per-chunk hashes
//!
//! The transfer root is BLAKE3 over the concatenation of chunk hashes in
//! index order. An empty file (zero chunks) hashes to `BLAKE3("")`.

use super::blake3;

/// Accumulates per-chunk hashes and produces the transfer root
#[derive(Debug, Clone, Default)]
pub struct MerkleTree {
    leaves: Vec<[u8; 32]>,
}

impl MerkleTree {
    /// Create an empty tree
    pub fn new() -> Self {
        Self { leaves: Vec::new() }
    }

    /// Create a tree with capacity for a known chunk count
    pub fn with_capacity(chunks: usize) -> Self {
        Self {
            leaves: Vec::with_capacity(chunks),
        }
    }

    /// Append the hash of the next chunk (must be called in index order)
    pub fn push(&mut self, chunk_hash: [u8; 32]) {
        self.leaves.push(chunk_hash);
    }

    /// Number of chunk hashes accumulated so far
    pub fn len(&self) -> usize {
        self.leaves.len()
    }

    /// True when no chunk hashes have been accumulated
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty()
    }

    /// Compute the root over all accumulated chunk hashes
    pub fn root(&self) -> [u8; 32] {
        root_of(&self.leaves)
    }

    /// The accumulated per-chunk hashes, in order
    pub fn leaves(&self) -> &[[u8; 32]] {
        &self.leaves
    }
}

/// Compute the root for an ordered slice of chunk hashes
pub fn root_of(hashes: &[[u8; 32]]) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    for h in hashes {
        hasher.update(h);
    }
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root_is_blake3_empty() {
        let tree = MerkleTree::new();
        assert_eq!(tree.root(), blake3::hash(b""));
    }

    #[test]
    fn test_root_is_order_sensitive() {
        let a = blake3::hash(b"chunk-a");
        let b = blake3::hash(b"chunk-b");
        assert_ne!(root_of(&[a, b]), root_of(&[b, a]));
    }

    #[test]
    fn test_incremental_matches_slice() {
        let hashes: Vec<[u8; 32]> = (0u8..16).map(|i| blake3::hash(&[i])).collect();
        let mut tree = MerkleTree::with_capacity(hashes.len());
        for h in &hashes {
            tree.push(*h);
        }
        assert_eq!(tree.root(), root_of(&hashes));
        assert_eq!(tree.len(), 16);
    }

    #[test]
    fn test_single_chunk() {
        let h = blake3::hash(b"only");
        let mut tree = MerkleTree::new();
        tree.push(h);
        assert_eq!(tree.root(), root_of(&[h]));
    }
}
