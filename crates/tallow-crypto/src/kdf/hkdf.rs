//! HKDF-SHA256 expansion for interop contexts
//!
//! The session stack derives with BLAKE3; HKDF is kept for contexts where
//! a SHA-2 based extract/expand is required (TLS exporter style material).

use crate::error::{CryptoError, Result};
use hkdf::Hkdf;
use sha2::Sha256;

/// HKDF-SHA256 extract-and-expand to an arbitrary output length
///
/// # Arguments
///
/// * `ikm` - Input keying material
/// * `salt` - Optional salt (None uses the all-zero salt per RFC 5869)
/// * `info` - Context/application info bytes
/// * `okm` - Output buffer, filled completely
pub fn derive(ikm: &[u8], salt: Option<&[u8]>, info: &[u8], okm: &mut [u8]) -> Result<()> {
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    hk.expand(info, okm)
        .map_err(|e| CryptoError::Kdf(format!("HKDF expand: {}", e)))
}

/// HKDF-SHA256 to a 32-byte key
pub fn derive_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<[u8; 32]> {
    let mut okm = [0u8; 32];
    derive(ikm, salt, info, &mut okm)?;
    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hkdf_deterministic() {
        let a = derive_32(b"ikm", Some(b"salt"), b"info").unwrap();
        let b = derive_32(b"ikm", Some(b"salt"), b"info").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_hkdf_info_separation() {
        let a = derive_32(b"ikm", None, b"context-a").unwrap();
        let b = derive_32(b"ikm", None, b"context-b").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hkdf_long_output() {
        let mut okm = [0u8; 96];
        derive(b"ikm", None, b"long", &mut okm).unwrap();
        assert_ne!(okm[..32], okm[32..64]);
    }
}
