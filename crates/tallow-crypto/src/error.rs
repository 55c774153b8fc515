//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias using CryptoError
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Error during key generation
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Key material is malformed (wrong length, invalid encoding)
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// KEM decapsulation failed on well-formed but wrong ciphertext
    #[error("Decapsulation failed: {0}")]
    DecapsFailure(String),

    /// AEAD authentication tag did not verify
    #[error("Authentication tag mismatch")]
    TagMismatch,

    /// Ratchet header counter is too far behind the receive window
    #[error("Stale header: counter {counter} below window floor {floor}")]
    StaleHeader {
        /// Counter carried by the rejected header
        counter: u64,
        /// Lowest counter still accepted
        floor: u64,
    },

    /// Nonce counter space exhausted for this key
    #[error("Nonce counter exhausted")]
    NonceExhausted,

    /// Ratchet state no longer lines up with the peer's
    #[error("Ratchet desync: {0}")]
    Desync(String),

    /// Session aborted after repeated authentication failures
    #[error("Session aborted after repeated authentication failures")]
    SessionAborted,

    /// Invalid nonce value
    #[error("Invalid nonce: {0}")]
    InvalidNonce(String),

    /// PAKE protocol failure (generic on purpose - no hint which side was wrong)
    #[error("PAKE authentication failed")]
    PakeFailure,

    /// Error during signing
    #[error("Signing failed: {0}")]
    Signing(String),

    /// Error during signature verification
    #[error("Verification failed: {0}")]
    Verification(String),

    /// Hash mismatch detected
    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// Expected hash value (hex)
        expected: String,
        /// Actual hash value (hex)
        actual: String,
    },

    /// KDF parameter or output error
    #[error("KDF failed: {0}")]
    Kdf(String),

    /// I/O error during cryptographic operation
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for CryptoError {
    fn from(e: std::io::Error) -> Self {
        CryptoError::Io(e.to_string())
    }
}

impl From<bincode::Error> for CryptoError {
    fn from(e: bincode::Error) -> Self {
        CryptoError::Serialization(e.to_string())
    }
}
