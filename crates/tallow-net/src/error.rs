//! Network error types

use thiserror::Error;

/// Network layer errors
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Connection failed to establish
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Operation timed out
    #[error("Timed out: {0}")]
    Timeout(&'static str),

    /// Channel was closed by the peer or locally
    #[error("Channel closed")]
    ChannelClosed,

    /// NAT traversal failed across the whole strategy chain
    #[error("NAT traversal failed: {0}")]
    NatTraversal(String),

    /// STUN request failed or response was malformed
    #[error("STUN error: {0}")]
    Stun(String),

    /// Relay server error
    #[error("Relay error: {0}")]
    Relay(String),

    /// Relay redirected this room to another shard
    #[error("Relay redirect to {0}")]
    RelayRedirect(String),

    /// TLS setup or handshake failure
    #[error("TLS error: {0}")]
    Tls(String),

    /// mDNS discovery failure
    #[error("Discovery error: {0}")]
    Discovery(String),

    /// Wire protocol failure on a channel
    #[error(transparent)]
    Protocol(#[from] tallow_protocol::ProtocolError),

    /// IO error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for NetworkError {
    fn from(e: postcard::Error) -> Self {
        NetworkError::ConnectionFailed(format!("codec: {}", e))
    }
}
