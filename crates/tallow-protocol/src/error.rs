//! Protocol error types

use thiserror::Error;

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors across the wire, chunk, and transfer layers
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Malformed or truncated frame
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Peer speaks an unsupported wire version
    #[error("Unsupported wire version {0}")]
    UnsupportedVersion(u8),

    /// Frame payload exceeds the allowed size
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Observed payload size
        size: usize,
        /// Maximum allowed
        max: usize,
    },

    /// Handshake message arrived out of sequence
    #[error("Handshake out of sequence: expected {expected}, got {got}")]
    HandshakeSequence {
        /// What the state machine was waiting for
        expected: &'static str,
        /// What arrived
        got: &'static str,
    },

    /// Input validation failure (bad room code, oversize file, bad name)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// State machine rejected a transition
    #[error("Invalid transfer transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },

    /// Chunk index outside the transfer's range
    #[error("Chunk index {index} out of range (total {total})")]
    ChunkOutOfRange {
        /// Offending index
        index: u64,
        /// Total chunks in the transfer
        total: u64,
    },

    /// Chunk retries exhausted
    #[error("Chunk {index} failed after {attempts} attempts")]
    RetriesExhausted {
        /// Chunk index
        index: u64,
        /// Attempts made
        attempts: u32,
    },

    /// Completion-time root hash mismatch
    #[error("Merkle root mismatch")]
    RootMismatch,

    /// Signaling envelope rejected (replay, stale timestamp, bad MAC)
    #[error("Envelope rejected: {0}")]
    EnvelopeRejected(String),

    /// Cryptographic failure bubbled up from the crypto layer
    #[error(transparent)]
    Crypto(#[from] tallow_crypto::CryptoError),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O failure reading or writing transfer data
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for ProtocolError {
    fn from(e: postcard::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ProtocolError {
    fn from(e: serde_json::Error) -> Self {
        ProtocolError::Serialization(e.to_string())
    }
}
