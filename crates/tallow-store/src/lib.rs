//! Persistence layer for Tallow
//!
//! Owns everything that touches disk: resumable transfer records with
//! per-chunk transactionality, the configuration surface (file plus
//! environment), and the device identity keypair.

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod identity;
pub mod paths;
pub mod transfer_store;

pub use config::Config;
pub use error::{Result, StoreError};
pub use transfer_store::TransferStore;

/// Current unix time in seconds
pub fn now_unix() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
