//! Key derivation: BLAKE3/HKDF key expansion and Argon2id password hashing

pub mod hkdf;
pub mod password;

use crate::hash::blake3;

/// Derive a 32-byte key from input material under a registered domain context
///
/// This is the derivation used throughout the session stack. Contexts must
/// come from [`crate::hash::domain`].
pub fn derive_key(ikm: &[u8], context: &str) -> [u8; 32] {
    blake3::derive_key(context, ikm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::domain;

    #[test]
    fn test_context_separation() {
        let ikm = b"shared input keying material";
        let a = derive_key(ikm, domain::ROOT_KEY);
        let b = derive_key(ikm, domain::MESSAGE_KEY);
        assert_ne!(a, b);
    }

    #[test]
    fn test_deterministic() {
        let ikm = [3u8; 32];
        assert_eq!(
            derive_key(&ikm, domain::STORAGE_KEY),
            derive_key(&ikm, domain::STORAGE_KEY)
        );
    }
}
