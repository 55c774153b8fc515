//! # Tallow Cryptography Library
//!
//! This crate provides all cryptographic primitives for the Tallow secure file transfer system:
//! the hybrid post-quantum key exchange, the symmetric AEAD layer, key derivation, the
//! CPace PAKE used for room joining, and the ratcheting session protocol.
//!
//! ## Features
//!
//! - **Hybrid Key Exchange**: X25519 combined with ML-KEM-768 so the shared secret
//!   stays secure if either primitive holds
//! - **Ratcheting Sessions**: forward secrecy and post-compromise security over
//!   long-lived transfers
//! - **Memory Safety**: automatic zeroization of sensitive data
//! - **Constant-Time Operations**: protection against timing side-channels
//! - **Domain Separation**: a fixed registry of derivation contexts

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod hash;
pub mod kdf;
pub mod kem;
pub mod mem;
pub mod pake;
pub mod ratchet;
pub mod sig;
pub mod symmetric;

// Re-export commonly used types
pub use error::{CryptoError, Result};
pub use symmetric::CipherSuite;

/// Library version constant
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the cryptography library (e.g., prevent core dumps)
///
/// This should be called once at application startup for maximum security.
pub fn init() -> Result<()> {
    mem::wipe::prevent_core_dumps()?;
    Ok(())
}
