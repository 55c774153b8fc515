//! Relay protocol shared between client and server

pub mod proto;

pub use proto::{read_message, write_message, RelayRequest, RelayResponse};
