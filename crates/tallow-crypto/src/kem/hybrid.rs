//! Hybrid KEM combining X25519 and ML-KEM-768
//!
//! The two public keys are always transmitted together and always consumed
//! together; the combined shared secret is the BLAKE3 KDF of both component
//! secrets under the `tallow-hybrid-v1` context, so it stays secure as long
//! as either primitive holds.

use crate::error::{CryptoError, Result};
use crate::hash::{blake3, domain};
use crate::kem::dh::{DhKeyPair, DhPublic};
use crate::kem::mlkem;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Wire length of a hybrid public key: X25519 followed by ML-KEM-768
pub const PUBLIC_KEY_LEN: usize = 32 + mlkem::PUBLIC_KEY_LEN;

/// Wire length of a hybrid ciphertext: ephemeral X25519 public followed by
/// the ML-KEM ciphertext
pub const CIPHERTEXT_LEN: usize = 32 + mlkem::CIPHERTEXT_LEN;

/// Hybrid public key (X25519 + ML-KEM-768)
#[derive(Clone, Serialize, Deserialize)]
pub struct HybridPublicKey {
    /// X25519 public key component for classical Diffie-Hellman
    pub dh: DhPublic,
    /// ML-KEM-768 public key component for post-quantum encapsulation
    pub mlkem: mlkem::PublicKey,
}

impl HybridPublicKey {
    /// Encode as the fixed-layout concatenation `x25519 || mlkem`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(PUBLIC_KEY_LEN);
        out.extend_from_slice(self.dh.as_bytes());
        out.extend_from_slice(self.mlkem.as_bytes());
        out
    }

    /// Parse the fixed-layout concatenation, rejecting any length mismatch
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "hybrid public key length: expected {}, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        let dh_bytes: [u8; 32] = bytes[..32].try_into().expect("length checked");
        let mlkem = mlkem::PublicKey::from_bytes(bytes[32..].to_vec())?;
        Ok(Self {
            dh: DhPublic::from_bytes(dh_bytes),
            mlkem,
        })
    }
}

/// Hybrid secret key (X25519 + ML-KEM-768)
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
pub struct HybridSecretKey {
    /// X25519 keypair component for classical Diffie-Hellman
    pub dh: DhKeyPair,
    /// ML-KEM-768 secret key component for post-quantum decapsulation
    pub mlkem: mlkem::SecretKey,
}

/// Hybrid ciphertext
#[derive(Clone, Serialize, Deserialize)]
pub struct HybridCiphertext {
    /// Ephemeral X25519 public key for the classical DH component
    pub dh_ephemeral: DhPublic,
    /// ML-KEM-768 ciphertext encapsulating the post-quantum shared secret
    pub mlkem: mlkem::Ciphertext,
}

impl HybridCiphertext {
    /// Encode as the fixed-layout concatenation `x25519_eph || mlkem_ct`
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(CIPHERTEXT_LEN);
        out.extend_from_slice(self.dh_ephemeral.as_bytes());
        out.extend_from_slice(self.mlkem.as_bytes());
        out
    }

    /// Parse the fixed-layout concatenation, rejecting any length mismatch
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CIPHERTEXT_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "hybrid ciphertext length: expected {}, got {}",
                CIPHERTEXT_LEN,
                bytes.len()
            )));
        }
        let dh_bytes: [u8; 32] = bytes[..32].try_into().expect("length checked");
        let mlkem = mlkem::Ciphertext::from_bytes(bytes[32..].to_vec())?;
        Ok(Self {
            dh_ephemeral: DhPublic::from_bytes(dh_bytes),
            mlkem,
        })
    }
}

/// Hybrid shared secret
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret(pub [u8; 32]);

/// Hybrid KEM operations
pub struct HybridKem;

impl HybridKem {
    /// Generate a new hybrid keypair
    pub fn keygen() -> Result<(HybridPublicKey, HybridSecretKey)> {
        let (mlkem_pk, mlkem_sk) = mlkem::MlKem::keygen()?;
        let dh = DhKeyPair::generate();

        let pk = HybridPublicKey {
            dh: dh.public(),
            mlkem: mlkem_pk,
        };

        let sk = HybridSecretKey {
            dh,
            mlkem: mlkem_sk,
        };

        Ok((pk, sk))
    }

    /// Encapsulate a shared secret to a hybrid public key
    ///
    /// Returns the hybrid ciphertext to transmit and the combined shared
    /// secret.
    pub fn encapsulate(pk: &HybridPublicKey) -> Result<(HybridCiphertext, SharedSecret)> {
        // Encapsulate with ML-KEM
        let (mlkem_ct, mlkem_ss) = mlkem::MlKem::encapsulate(&pk.mlkem)?;

        // Fresh ephemeral DH against the recipient's static key
        let ephemeral = DhKeyPair::generate();
        let dh_ss = ephemeral.exchange(&pk.dh);

        let combined = Self::combine_secrets(&mlkem_ss.0, &dh_ss);

        let ct = HybridCiphertext {
            dh_ephemeral: ephemeral.public(),
            mlkem: mlkem_ct,
        };

        Ok((ct, SharedSecret(combined)))
    }

    /// Decapsulate a shared secret from a hybrid ciphertext
    pub fn decapsulate(sk: &HybridSecretKey, ct: &HybridCiphertext) -> Result<SharedSecret> {
        let mlkem_ss = mlkem::MlKem::decapsulate(&sk.mlkem, &ct.mlkem)?;
        let dh_ss = sk.dh.exchange(&ct.dh_ephemeral);

        let combined = Self::combine_secrets(&mlkem_ss.0, &dh_ss);

        Ok(SharedSecret(combined))
    }

    /// Combine both component secrets under the hybrid domain context
    fn combine_secrets(mlkem_ss: &[u8; 32], dh_ss: &[u8; 32]) -> [u8; 32] {
        let mut combined_input = [0u8; 64];
        combined_input[..32].copy_from_slice(mlkem_ss);
        combined_input[32..].copy_from_slice(dh_ss);

        let result = blake3::derive_key(domain::HYBRID_V1, &combined_input);

        combined_input.zeroize();

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hybrid_roundtrip() {
        let (pk, sk) = HybridKem::keygen().unwrap();
        let (ct, ss1) = HybridKem::encapsulate(&pk).unwrap();
        let ss2 = HybridKem::decapsulate(&sk, &ct).unwrap();

        assert_eq!(ss1.0, ss2.0);
    }

    #[test]
    fn test_hybrid_wire_roundtrip() {
        let (pk, sk) = HybridKem::keygen().unwrap();

        let pk2 = HybridPublicKey::from_bytes(&pk.to_bytes()).unwrap();
        let (ct, ss1) = HybridKem::encapsulate(&pk2).unwrap();

        let ct2 = HybridCiphertext::from_bytes(&ct.to_bytes()).unwrap();
        let ss2 = HybridKem::decapsulate(&sk, &ct2).unwrap();

        assert_eq!(ss1.0, ss2.0);
    }

    #[test]
    fn test_hybrid_rejects_truncated_key() {
        let (pk, _) = HybridKem::keygen().unwrap();
        let mut bytes = pk.to_bytes();
        bytes.pop();
        assert!(HybridPublicKey::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_hybrid_public_key_layout() {
        let (pk, _) = HybridKem::keygen().unwrap();
        let bytes = pk.to_bytes();
        assert_eq!(bytes.len(), PUBLIC_KEY_LEN);
        assert_eq!(&bytes[..32], pk.dh.as_bytes());
    }

    #[test]
    fn test_hybrid_serialization() {
        let (pk, sk) = HybridKem::keygen().unwrap();

        let pk_serialized = bincode::serialize(&pk).unwrap();
        let sk_serialized = bincode::serialize(&sk).unwrap();

        let pk2: HybridPublicKey = bincode::deserialize(&pk_serialized).unwrap();
        let sk2: HybridSecretKey = bincode::deserialize(&sk_serialized).unwrap();

        let (ct, ss1) = HybridKem::encapsulate(&pk2).unwrap();
        let ss2 = HybridKem::decapsulate(&sk2, &ct).unwrap();

        assert_eq!(ss1.0, ss2.0);
    }

    #[test]
    fn test_wrong_recipient_diverges() {
        let (pk, _sk) = HybridKem::keygen().unwrap();
        let (_pk2, sk2) = HybridKem::keygen().unwrap();
        let (ct, ss1) = HybridKem::encapsulate(&pk).unwrap();
        if let Ok(ss2) = HybridKem::decapsulate(&sk2, &ct) {
            assert_ne!(ss1.0, ss2.0);
        }
    }
}
