//! ML-DSA-65 (FIPS 204) signatures
//!
//! Used for prekey signing and device identity. One lattice signature
//! class only; no hybrid signature suite.

use crate::error::{CryptoError, Result};
use fips204::ml_dsa_65;
use fips204::traits::{SerDes, Signer, Verifier};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Public key length in bytes
pub const PUBLIC_KEY_LEN: usize = ml_dsa_65::PK_LEN;

/// Secret key length in bytes
pub const SECRET_KEY_LEN: usize = ml_dsa_65::SK_LEN;

/// Signature length in bytes
pub const SIGNATURE_LEN: usize = ml_dsa_65::SIG_LEN;

/// ML-DSA-65 verifying (public) key
#[derive(Clone, Serialize, Deserialize)]
pub struct VerifyingKey(Vec<u8>);

/// ML-DSA-65 signing (secret) key
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
pub struct SigningKey(Vec<u8>);

impl VerifyingKey {
    /// Raw bytes of the public key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a public key, rejecting wrong lengths
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ML-DSA public key length: expected {}, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Verify a signature over a message
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        let pk_bytes: [u8; PUBLIC_KEY_LEN] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ML-DSA public key length".into()))?;
        let pk = ml_dsa_65::PublicKey::try_from_bytes(pk_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("ML-DSA public key: {}", e)))?;

        let sig: [u8; SIGNATURE_LEN] = signature
            .try_into()
            .map_err(|_| CryptoError::Verification("signature length".into()))?;

        if pk.verify(message, &sig, &[]) {
            Ok(())
        } else {
            Err(CryptoError::Verification("signature invalid".into()))
        }
    }
}

impl SigningKey {
    /// Generate a new signing keypair
    pub fn generate() -> Result<(VerifyingKey, SigningKey)> {
        let (pk, sk) = ml_dsa_65::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration(format!("ML-DSA keygen: {}", e)))?;
        Ok((
            VerifyingKey(pk.into_bytes().to_vec()),
            SigningKey(sk.into_bytes().to_vec()),
        ))
    }

    /// Raw bytes of the secret key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a secret key, rejecting wrong lengths
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ML-DSA secret key length: expected {}, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Sign a message
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        let sk_bytes: [u8; SECRET_KEY_LEN] = self
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ML-DSA secret key length".into()))?;
        let sk = ml_dsa_65::PrivateKey::try_from_bytes(sk_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("ML-DSA secret key: {}", e)))?;

        let sig = sk
            .try_sign(message, &[])
            .map_err(|e| CryptoError::Signing(format!("ML-DSA sign: {}", e)))?;

        Ok(sig.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let (vk, sk) = SigningKey::generate().unwrap();
        let msg = b"device identity binding";
        let sig = sk.sign(msg).unwrap();
        assert!(vk.verify(msg, &sig).is_ok());
    }

    #[test]
    fn test_verify_rejects_tampered_message() {
        let (vk, sk) = SigningKey::generate().unwrap();
        let sig = sk.sign(b"original").unwrap();
        assert!(vk.verify(b"tampered", &sig).is_err());
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (_vk1, sk1) = SigningKey::generate().unwrap();
        let (vk2, _sk2) = SigningKey::generate().unwrap();
        let sig = sk1.sign(b"message").unwrap();
        assert!(vk2.verify(b"message", &sig).is_err());
    }

    #[test]
    fn test_key_length_checks() {
        assert!(VerifyingKey::from_bytes(vec![0u8; 5]).is_err());
        assert!(SigningKey::from_bytes(vec![0u8; 5]).is_err());
    }
}
