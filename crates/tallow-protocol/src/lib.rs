//! Tallow wire protocol and transfer engine
//!
//! Everything between the crypto primitives and the sockets: binary frame
//! formats, the chunk engine, the transfer state machine with resume and
//! delta sync, room codes, and the end-to-end-encrypted signaling
//! envelope.

#![forbid(unsafe_code)]

pub mod chunk;
pub mod error;
pub mod handshake;
pub mod room;
pub mod signaling;
pub mod transfer;
pub mod wire;

pub use error::{ProtocolError, Result};

/// Protocol wire version
pub const WIRE_VERSION: u8 = 1;
