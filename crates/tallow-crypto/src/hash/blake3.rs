//! BLAKE3 hashing wrappers

/// Hash arbitrary bytes to a 32-byte digest
pub fn hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Derive a 32-byte key from input material under a domain context
///
/// Contexts must come from [`crate::hash::domain`].
pub fn derive_key(context: &str, ikm: &[u8]) -> [u8; 32] {
    blake3::derive_key(context, ikm)
}

/// Keyed hash (MAC) with a 32-byte key
pub fn keyed_hash(key: &[u8; 32], data: &[u8]) -> [u8; 32] {
    *blake3::keyed_hash(key, data).as_bytes()
}

/// Incremental hasher for streaming input
pub struct Hasher(blake3::Hasher);

impl Hasher {
    /// Create a new incremental hasher
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    /// Feed more input
    pub fn update(&mut self, data: &[u8]) -> &mut Self {
        self.0.update(data);
        self
    }

    /// Finish and return the 32-byte digest
    pub fn finalize(&self) -> [u8; 32] {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_deterministic() {
        assert_eq!(hash(b"tallow"), hash(b"tallow"));
        assert_ne!(hash(b"tallow"), hash(b"wallot"));
    }

    #[test]
    fn test_derive_key_context_separation() {
        let ikm = [7u8; 32];
        let a = derive_key(crate::hash::domain::ROOT_KEY, &ikm);
        let b = derive_key(crate::hash::domain::CHAIN_KEY, &ikm);
        assert_ne!(a, b);
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let mut h = Hasher::new();
        h.update(b"hello ").update(b"world");
        assert_eq!(h.finalize(), hash(b"hello world"));
    }

    #[test]
    fn test_empty_hash_is_blake3_empty() {
        // The Merkle root of an empty file is defined as BLAKE3("")
        assert_eq!(hash(b""), *blake3::hash(b"").as_bytes());
    }
}
