//! Device identity
//!
//! A long-lived ML-DSA keypair identifies the device; its fingerprint is
//! the BLAKE3 hash of the verifying key. The keypair lives in the data
//! dir; the secret key bytes never appear in logs.

use crate::error::{Result, StoreError};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tallow_crypto::sig::{SigningKey, VerifyingKey};
use tracing::info;

/// On-disk identity format
#[derive(Serialize, Deserialize)]
struct StoredIdentity {
    version: u8,
    verifying_key: Vec<u8>,
    signing_key: Vec<u8>,
}

/// The device identity keypair
pub struct Identity {
    verifying: VerifyingKey,
    signing: SigningKey,
    fingerprint: [u8; 32],
}

impl Identity {
    /// Load the identity, generating and persisting one on first run
    pub fn load_or_generate(data_dir: &Path) -> Result<Self> {
        let path = paths::identity_file(data_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            let identity = Self::generate()?;
            identity.save(&path)?;
            info!(
                fingerprint = %hex::encode(&identity.fingerprint[..8]),
                "generated new device identity"
            );
            Ok(identity)
        }
    }

    /// Generate a fresh identity
    pub fn generate() -> Result<Self> {
        let (verifying, signing) = SigningKey::generate()?;
        let fingerprint = tallow_crypto::hash::blake3::hash(verifying.as_bytes());
        Ok(Self {
            verifying,
            signing,
            fingerprint,
        })
    }

    fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let stored: StoredIdentity = bincode::deserialize(&bytes)
            .map_err(|e| StoreError::Identity(format!("identity decode: {}", e)))?;
        let verifying = VerifyingKey::from_bytes(stored.verifying_key)?;
        let signing = SigningKey::from_bytes(stored.signing_key)?;
        let fingerprint = tallow_crypto::hash::blake3::hash(verifying.as_bytes());
        Ok(Self {
            verifying,
            signing,
            fingerprint,
        })
    }

    fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let stored = StoredIdentity {
            version: 1,
            verifying_key: self.verifying.as_bytes().to_vec(),
            signing_key: self.signing.as_bytes().to_vec(),
        };
        let bytes = bincode::serialize(&stored)
            .map_err(|e| StoreError::Identity(format!("identity encode: {}", e)))?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    /// The device fingerprint (BLAKE3 of the verifying key)
    pub fn fingerprint(&self) -> [u8; 32] {
        self.fingerprint
    }

    /// Short human-readable fingerprint prefix
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(&self.fingerprint[..8])
    }

    /// The verifying key for advertisement
    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying
    }

    /// Sign a message with the device key
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing.sign(message)?)
    }
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint_hex())
            .finish()
    }
}
