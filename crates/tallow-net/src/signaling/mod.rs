//! Signaling client: sealed envelopes over any peer channel

pub mod client;

pub use client::SignalingClient;
