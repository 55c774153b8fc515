//! Password-authenticated key exchange for room joining

pub mod cpace;

pub use cpace::{Pake, PakeKey, Role};
