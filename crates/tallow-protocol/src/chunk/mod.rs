//! Chunk engine: fragmentation, per-chunk sealing, root verification

pub mod chunker;
pub mod seal;
pub mod size;

pub use chunker::{Chunker, FileChunk};
pub use seal::{finalize, SealedChunk, TransferCipher};
pub use size::ChunkSize;
