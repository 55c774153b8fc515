//! Network layer for Tallow secure file transfer
//!
//! Transport channels with watermark backpressure and a QUIC → hole-punched
//! datagram → TLS-relay fallback chain, STUN-based NAT classification with
//! the traversal strategy matrix, mDNS LAN discovery, and the relay/signaling
//! clients.

#![forbid(unsafe_code)]

pub mod discovery;
pub mod error;
pub mod nat;
pub mod relay;
pub mod signaling;
pub mod transport;

pub use error::NetworkError;
pub use transport::{Channel, LinkStats, PeerChannel};

/// Result type for network operations
pub type Result<T> = std::result::Result<T, NetworkError>;
