//! Store error types

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the persistence layer
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record exists but cannot be decoded (corrupt or future version)
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// No record stored under the requested id
    #[error("Transfer not found")]
    NotFound,

    /// Configuration file malformed
    #[error("Config error: {0}")]
    Config(String),

    /// Identity key material malformed
    #[error("Identity error: {0}")]
    Identity(String),

    /// Crypto failure while handling stored key material
    #[error(transparent)]
    Crypto(#[from] tallow_crypto::CryptoError),
}

impl From<postcard::Error> for StoreError {
    fn from(e: postcard::Error) -> Self {
        StoreError::Corrupt(e.to_string())
    }
}

impl From<toml::de::Error> for StoreError {
    fn from(e: toml::de::Error) -> Self {
        StoreError::Config(e.to_string())
    }
}
