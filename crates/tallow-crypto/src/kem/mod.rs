//! Key encapsulation: classical DH, ML-KEM-768, and the hybrid combination

pub mod dh;
pub mod hybrid;
pub mod mlkem;

pub use hybrid::{HybridKem, HybridPublicKey, HybridSecretKey};
