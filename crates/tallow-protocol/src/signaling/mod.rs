//! End-to-end-encrypted signaling
//!
//! The signaling server shuttles envelopes between peers in a room
//! without being able to read them: bodies are sealed under a key derived
//! from the PAKE exchange, and the server indexes rooms only by code
//! hash.

pub mod envelope;
pub mod replay;

pub use envelope::{Envelope, EnvelopeKind, EnvelopeSealer};
pub use replay::ReplayGuard;
