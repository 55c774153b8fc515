//! Symmetric AEAD layer: cipher suite, counter nonces

pub mod cipher;
pub mod nonce;

pub use cipher::{Cipher, CipherSuite};
pub use nonce::{Direction, NonceSequence};
