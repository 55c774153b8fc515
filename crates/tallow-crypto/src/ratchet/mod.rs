//! Ratcheting session protocol
//!
//! Provides forward secrecy and post-compromise security across a
//! long-lived transfer or chat session. Each direction ratchets
//! independently: the sending side advances its chain per message,
//! rotates its DH ephemeral on the configured cadence, and periodically
//! re-keys through ML-KEM against the peer's advertised encapsulation
//! key.

pub mod session;
pub mod skipped;

pub use session::{
    Header, InitiatorHandshake, PqAdvert, RatchetConfig, ResponderHandshake, Session,
};
pub use skipped::SkippedKeys;
