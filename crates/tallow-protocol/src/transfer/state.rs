//! Transfer status machine and persisted record
//!
//! Status graph:
//!
//! ```text
//! PENDING -> TRANSFERRING <-> PAUSED
//! TRANSFERRING -> RETRYING -> TRANSFERRING
//! TRANSFERRING -> COMPLETED | FAILED
//! any non-terminal -> CANCELLED
//! ```
//!
//! COMPLETED, FAILED, and CANCELLED are terminal. Every transition goes
//! through [`TransferRecord::transition`]; an invalid transition is an
//! error, never a silent state change.

use crate::error::{ProtocolError, Result};
use crate::transfer::bitmap::ChunkBitmap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 128-bit transfer identifier
pub type TransferId = [u8; 16];

/// Transfer lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Created, handshake or acceptance outstanding
    Pending,
    /// Chunks are flowing
    Transferring,
    /// Retrying failed chunks (self-loop on Transferring)
    Retrying,
    /// Paused by user action or transport loss
    Paused,
    /// All chunks delivered and root verified
    Completed,
    /// Unrecoverable failure
    Failed,
    /// Explicitly cancelled
    Cancelled,
}

impl Status {
    /// Terminal states admit no further transitions
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Completed | Status::Failed | Status::Cancelled)
    }

    /// Whether `self -> to` is an allowed transition
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!(
            (self, to),
            (Pending, Transferring)
                | (Transferring, Paused)
                | (Transferring, Retrying)
                | (Retrying, Transferring)
                | (Retrying, Paused)
                | (Retrying, Failed)
                | (Paused, Transferring)
                | (Transferring, Completed)
                | (Transferring, Failed)
        ) || (!self.is_terminal() && to == Cancelled)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Transferring => "transferring",
            Status::Retrying => "retrying",
            Status::Paused => "paused",
            Status::Completed => "completed",
            Status::Failed => "failed",
            Status::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// The persisted state of one transfer
///
/// This is the record the store serializes; secrets never appear here -
/// the session key is referenced by a non-secret handle, and the filename
/// is stored only in its sealed form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Record format version
    pub version: u8,
    /// Unique transfer id
    pub id: TransferId,
    /// Filename sealed under the session filename key
    pub file_name_ciphertext: Vec<u8>,
    /// File size in bytes
    pub file_size: u64,
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Total chunk count
    pub total_chunks: u64,
    /// Acknowledgement bitmap
    pub bitmap: ChunkBitmap,
    /// BLAKE3 of each chunk plaintext, in order
    pub chunk_hashes: Vec<[u8; 32]>,
    /// Root over the chunk hashes
    pub merkle_root: [u8; 32],
    /// Non-secret handle naming the session keys in memory
    pub session_key_handle: u64,
    /// Peer identity fingerprint
    pub peer_fingerprint: [u8; 32],
    /// Lifecycle status
    pub status: Status,
    /// Creation time, unix seconds
    pub created_at: u64,
    /// Last update time, unix seconds
    pub updated_at: u64,
    /// Retry counts per chunk index
    pub retry_counts: BTreeMap<u64, u32>,
    /// Nonce counter position for resume (send side)
    pub nonce_counter: u64,
}

impl TransferRecord {
    /// Current record format version
    pub const VERSION: u8 = 1;

    /// Create a fresh record in `Pending`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransferId,
        file_name_ciphertext: Vec<u8>,
        file_size: u64,
        chunk_size: u32,
        total_chunks: u64,
        chunk_hashes: Vec<[u8; 32]>,
        merkle_root: [u8; 32],
        peer_fingerprint: [u8; 32],
        now: u64,
    ) -> Result<Self> {
        if chunk_hashes.len() as u64 != total_chunks {
            return Err(ProtocolError::Validation(format!(
                "{} chunk hashes for {} chunks",
                chunk_hashes.len(),
                total_chunks
            )));
        }
        Ok(Self {
            version: Self::VERSION,
            id,
            file_name_ciphertext,
            file_size,
            chunk_size,
            total_chunks,
            bitmap: ChunkBitmap::new(total_chunks),
            chunk_hashes,
            merkle_root,
            session_key_handle: 0,
            peer_fingerprint,
            status: Status::Pending,
            created_at: now,
            updated_at: now,
            retry_counts: BTreeMap::new(),
            nonce_counter: 0,
        })
    }

    /// Apply a status transition, enforcing the machine
    pub fn transition(&mut self, to: Status, now: u64) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(ProtocolError::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    /// Mark a chunk acknowledged and bump the update time
    pub fn ack_chunk(&mut self, index: u64, now: u64) -> Result<()> {
        self.bitmap.set(index)?;
        self.updated_at = now;
        Ok(())
    }

    /// Record a retry for a chunk; returns the attempt count
    pub fn record_retry(&mut self, index: u64, now: u64) -> u32 {
        let count = self.retry_counts.entry(index).or_insert(0);
        *count += 1;
        self.updated_at = now;
        *count
    }

    /// All chunk bits set and the computed root matches the advertised one
    pub fn verify_complete(&self) -> Result<()> {
        if !self.bitmap.is_complete() {
            return Err(ProtocolError::Validation(format!(
                "{} of {} chunks delivered",
                self.bitmap.set_count(),
                self.total_chunks
            )));
        }
        let root = crate::chunk::finalize(&self.chunk_hashes);
        if root != self.merkle_root {
            return Err(ProtocolError::RootMismatch);
        }
        Ok(())
    }

    /// Fraction of chunks delivered, 0.0 to 1.0
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            1.0
        } else {
            self.bitmap.set_count() as f64 / self.total_chunks as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(total_chunks: u64) -> TransferRecord {
        let hashes: Vec<[u8; 32]> = (0..total_chunks)
            .map(|i| tallow_crypto::hash::blake3::hash(&i.to_be_bytes()))
            .collect();
        let root = crate::chunk::finalize(&hashes);
        TransferRecord::new(
            [1u8; 16],
            vec![],
            total_chunks * 1024,
            1024,
            total_chunks,
            hashes,
            root,
            [2u8; 32],
            1_700_000_000,
        )
        .unwrap()
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut r = record(4);
        r.transition(Status::Transferring, 1).unwrap();
        r.transition(Status::Paused, 2).unwrap();
        r.transition(Status::Transferring, 3).unwrap();
        for i in 0..4 {
            r.ack_chunk(i, 4).unwrap();
        }
        r.transition(Status::Completed, 5).unwrap();
        assert!(r.status.is_terminal());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut r = record(1);
        // Pending cannot pause
        assert!(r.transition(Status::Paused, 1).is_err());
        // Pending cannot complete
        assert!(r.transition(Status::Completed, 1).is_err());
        // Pending cannot retry
        assert!(r.transition(Status::Retrying, 1).is_err());
    }

    #[test]
    fn test_completed_is_final() {
        let mut r = record(0);
        r.transition(Status::Transferring, 1).unwrap();
        r.transition(Status::Completed, 2).unwrap();
        assert!(r.transition(Status::Transferring, 3).is_err());
        assert!(r.transition(Status::Cancelled, 3).is_err());
    }

    #[test]
    fn test_cancel_from_anywhere_non_terminal() {
        let mut pending = record(1);
        assert!(pending.transition(Status::Cancelled, 1).is_ok());

        let mut paused = record(1);
        paused.transition(Status::Transferring, 1).unwrap();
        paused.transition(Status::Paused, 2).unwrap();
        assert!(paused.transition(Status::Cancelled, 3).is_ok());
    }

    #[test]
    fn test_retrying_self_loop() {
        let mut r = record(1);
        r.transition(Status::Transferring, 1).unwrap();
        r.transition(Status::Retrying, 2).unwrap();
        r.transition(Status::Transferring, 3).unwrap();
    }

    #[test]
    fn test_verify_complete() {
        let mut r = record(2);
        assert!(r.verify_complete().is_err());
        r.ack_chunk(0, 1).unwrap();
        r.ack_chunk(1, 1).unwrap();
        assert!(r.verify_complete().is_ok());
    }

    #[test]
    fn test_root_mismatch_detected() {
        let mut r = record(2);
        r.ack_chunk(0, 1).unwrap();
        r.ack_chunk(1, 1).unwrap();
        r.merkle_root = [0xFFu8; 32];
        assert!(matches!(
            r.verify_complete(),
            Err(ProtocolError::RootMismatch)
        ));
    }

    #[test]
    fn test_hash_count_must_match_chunks() {
        let hashes = vec![[0u8; 32]; 3];
        assert!(TransferRecord::new(
            [0u8; 16],
            vec![],
            1024,
            1024,
            5,
            hashes,
            [0u8; 32],
            [0u8; 32],
            0
        )
        .is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut r = record(9);
        r.ack_chunk(4, 10).unwrap();
        r.record_retry(4, 11);
        let bytes = postcard::to_stdvec(&r).unwrap();
        let back: TransferRecord = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(back, r);
    }
}
