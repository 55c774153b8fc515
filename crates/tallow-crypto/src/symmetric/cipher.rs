//! AEAD cipher suite
//!
//! One closed enum over the supported AEADs; every variant takes a 32-byte
//! key and a 96-bit nonce and appends a 16-byte tag. `open` verifies the
//! tag before any plaintext is exposed.

use crate::error::{CryptoError, Result};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AEAD tag length in bytes
pub const TAG_LEN: usize = 16;

/// AEAD nonce length in bytes
pub const NONCE_LEN: usize = 12;

/// Extended nonce length for XChaCha20 (signaling envelopes)
pub const XNONCE_LEN: usize = 24;

/// Supported AEAD algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CipherSuite {
    /// ChaCha20-Poly1305 (default - constant-time on all targets)
    ChaCha20Poly1305,
    /// AES-256-GCM (hardware-accelerated where AES-NI is present)
    Aes256Gcm,
}

impl Default for CipherSuite {
    fn default() -> Self {
        Self::ChaCha20Poly1305
    }
}

/// An AEAD instance bound to one key
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Cipher {
    #[zeroize(skip)]
    suite: CipherSuite,
    key: [u8; 32],
}

impl Cipher {
    /// Bind a cipher suite to a 32-byte key
    pub fn new(suite: CipherSuite, key: &[u8; 32]) -> Self {
        Self { suite, key: *key }
    }

    /// The suite this cipher was constructed with
    pub fn suite(&self) -> CipherSuite {
        self.suite
    }

    /// Encrypt and authenticate, returning `ciphertext || tag`
    pub fn seal(&self, nonce: &[u8; NONCE_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let payload = Payload {
            msg: plaintext,
            aad,
        };
        match self.suite {
            CipherSuite::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new((&self.key).into());
                cipher
                    .encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::TagMismatch)
            }
            CipherSuite::Aes256Gcm => {
                let cipher = Aes256Gcm::new((&self.key).into());
                cipher
                    .encrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::TagMismatch)
            }
        }
    }

    /// Verify the tag and decrypt
    ///
    /// Any tampering of ciphertext, tag, or AAD fails with
    /// [`CryptoError::TagMismatch`] and exposes no plaintext.
    pub fn open(&self, nonce: &[u8; NONCE_LEN], ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.len() < TAG_LEN {
            return Err(CryptoError::TagMismatch);
        }
        let payload = Payload {
            msg: ciphertext,
            aad,
        };
        match self.suite {
            CipherSuite::ChaCha20Poly1305 => {
                let cipher = ChaCha20Poly1305::new((&self.key).into());
                cipher
                    .decrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::TagMismatch)
            }
            CipherSuite::Aes256Gcm => {
                let cipher = Aes256Gcm::new((&self.key).into());
                cipher
                    .decrypt(nonce.into(), payload)
                    .map_err(|_| CryptoError::TagMismatch)
            }
        }
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher")
            .field("suite", &self.suite)
            .field("key", &"<REDACTED>")
            .finish()
    }
}

/// Seal with XChaCha20-Poly1305 under a 24-byte nonce
///
/// Used by the signaling envelope where nonces are random per message.
pub fn xchacha_seal(
    key: &[u8; 32],
    nonce: &[u8; XNONCE_LEN],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .encrypt(nonce.into(), Payload { msg: plaintext, aad })
        .map_err(|_| CryptoError::TagMismatch)
}

/// Open an XChaCha20-Poly1305 sealed message
pub fn xchacha_open(
    key: &[u8; 32],
    nonce: &[u8; XNONCE_LEN],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.into());
    cipher
        .decrypt(nonce.into(), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::TagMismatch)
}
