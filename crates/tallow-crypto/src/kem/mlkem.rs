//! ML-KEM-768 (FIPS 203)

use crate::error::{CryptoError, Result};
use fips203::ml_kem_768;
use fips203::traits::{Decaps, Encaps, KeyGen, SerDes};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Encapsulation key length in bytes
pub const PUBLIC_KEY_LEN: usize = ml_kem_768::EK_LEN;

/// Decapsulation key length in bytes
pub const SECRET_KEY_LEN: usize = ml_kem_768::DK_LEN;

/// Ciphertext length in bytes
pub const CIPHERTEXT_LEN: usize = ml_kem_768::CT_LEN;

/// ML-KEM-768 public (encapsulation) key
#[derive(Clone, Serialize, Deserialize)]
pub struct PublicKey(Vec<u8>);

/// ML-KEM-768 secret (decapsulation) key
#[derive(Clone, Zeroize, Serialize, Deserialize)]
#[zeroize(drop)]
pub struct SecretKey(Vec<u8>);

/// ML-KEM-768 ciphertext
#[derive(Clone, Serialize, Deserialize)]
pub struct Ciphertext(Vec<u8>);

/// ML-KEM-768 shared secret
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret(pub [u8; 32]);

impl PublicKey {
    /// Raw bytes of the encapsulation key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse an encapsulation key, rejecting wrong lengths
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ML-KEM public key length: expected {}, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }
}

impl SecretKey {
    /// Raw bytes of the decapsulation key
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a decapsulation key, rejecting wrong lengths
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != SECRET_KEY_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ML-KEM secret key length: expected {}, got {}",
                SECRET_KEY_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }
}

impl Ciphertext {
    /// Raw bytes of the ciphertext
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Parse a ciphertext, rejecting wrong lengths
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != CIPHERTEXT_LEN {
            return Err(CryptoError::InvalidKey(format!(
                "ML-KEM ciphertext length: expected {}, got {}",
                CIPHERTEXT_LEN,
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }
}

/// ML-KEM-768 operations
pub struct MlKem;

impl MlKem {
    /// Generate a new keypair
    pub fn keygen() -> Result<(PublicKey, SecretKey)> {
        let (ek, dk) = ml_kem_768::KG::try_keygen()
            .map_err(|e| CryptoError::KeyGeneration(format!("ML-KEM keygen: {}", e)))?;
        Ok((
            PublicKey(ek.into_bytes().to_vec()),
            SecretKey(dk.into_bytes().to_vec()),
        ))
    }

    /// Encapsulate a shared secret to a public key
    pub fn encapsulate(pk: &PublicKey) -> Result<(Ciphertext, SharedSecret)> {
        let ek_bytes: [u8; PUBLIC_KEY_LEN] = pk
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ML-KEM public key length".into()))?;
        let ek = ml_kem_768::EncapsKey::try_from_bytes(ek_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("ML-KEM public key: {}", e)))?;

        let (ssk, ct) = ek
            .try_encaps()
            .map_err(|e| CryptoError::KeyGeneration(format!("ML-KEM encaps: {}", e)))?;

        Ok((
            Ciphertext(ct.into_bytes().to_vec()),
            SharedSecret(ssk.into_bytes()),
        ))
    }

    /// Decapsulate a shared secret from a ciphertext
    pub fn decapsulate(sk: &SecretKey, ct: &Ciphertext) -> Result<SharedSecret> {
        let dk_bytes: [u8; SECRET_KEY_LEN] = sk
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ML-KEM secret key length".into()))?;
        let dk = ml_kem_768::DecapsKey::try_from_bytes(dk_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("ML-KEM secret key: {}", e)))?;

        let ct_bytes: [u8; CIPHERTEXT_LEN] = ct
            .0
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("ML-KEM ciphertext length".into()))?;
        let ct_obj = ml_kem_768::CipherText::try_from_bytes(ct_bytes)
            .map_err(|e| CryptoError::InvalidKey(format!("ML-KEM ciphertext: {}", e)))?;

        let ssk = dk
            .try_decaps(&ct_obj)
            .map_err(|e| CryptoError::DecapsFailure(format!("ML-KEM decaps: {}", e)))?;

        Ok(SharedSecret(ssk.into_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlkem_roundtrip() {
        let (pk, sk) = MlKem::keygen().unwrap();
        let (ct, ss1) = MlKem::encapsulate(&pk).unwrap();
        let ss2 = MlKem::decapsulate(&sk, &ct).unwrap();

        assert_eq!(ss1.0, ss2.0);
    }

    #[test]
    fn test_mlkem_serialization() {
        let (pk, sk) = MlKem::keygen().unwrap();

        let pk2 = PublicKey::from_bytes(pk.as_bytes().to_vec()).unwrap();
        let sk2 = SecretKey::from_bytes(sk.as_bytes().to_vec()).unwrap();

        let (ct, ss1) = MlKem::encapsulate(&pk2).unwrap();
        let ss2 = MlKem::decapsulate(&sk2, &ct).unwrap();

        assert_eq!(ss1.0, ss2.0);
    }

    #[test]
    fn test_mlkem_rejects_bad_lengths() {
        assert!(PublicKey::from_bytes(vec![0u8; 17]).is_err());
        assert!(SecretKey::from_bytes(vec![0u8; 17]).is_err());
        assert!(Ciphertext::from_bytes(vec![0u8; 17]).is_err());
    }

    #[test]
    fn test_mlkem_wrong_key_differs() {
        let (pk, _sk) = MlKem::keygen().unwrap();
        let (_pk2, sk2) = MlKem::keygen().unwrap();
        let (ct, ss1) = MlKem::encapsulate(&pk).unwrap();

        // Implicit rejection: decapsulating with the wrong key yields a
        // different secret rather than an error.
        if let Ok(ss2) = MlKem::decapsulate(&sk2, &ct) {
            assert_ne!(ss1.0, ss2.0);
        }
    }
}
