//! Tallow relay server
//!
//! Pairs two peers by room-code hash and pumps opaque bytes between
//! them. The relay never holds key material and never parses peer
//! traffic; its entire knowledge of a room is a 32-byte hash, two
//! sockets, and a byte counter.

#![forbid(unsafe_code)]

pub mod config;
pub mod rate_limit;
pub mod rooms;
pub mod server;

pub use config::RelayConfig;
pub use server::serve;
