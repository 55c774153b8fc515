//! Memory safety: constant-time comparison, zeroizing buffers, wipe hardening

pub mod constant_time;
pub mod secure_buf;
pub mod wipe;

pub use constant_time::constant_time_equal;
pub use secure_buf::SecureBuf;
