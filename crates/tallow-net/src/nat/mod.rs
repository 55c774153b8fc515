//! NAT classification and traversal strategy

pub mod candidates;
pub mod classify;
pub mod strategy;
pub mod stun;

pub use candidates::{gather_candidates, Candidate, CandidateKind};
pub use classify::{classify, NatClass};
pub use strategy::Strategy;
