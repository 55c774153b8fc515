//! Signatures for prekeys and device identity

pub mod mldsa;

pub use mldsa::{SigningKey, VerifyingKey};
