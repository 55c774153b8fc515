//! Hashing: BLAKE3 wrappers, domain separation registry, chunk Merkle root

pub mod blake3;
pub mod domain;
pub mod merkle;

pub use merkle::MerkleTree;
