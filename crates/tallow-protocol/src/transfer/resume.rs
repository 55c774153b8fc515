//! Resume negotiation and retry policy
//!
//! On reconnect the peers exchange bitmaps and the sender retransmits only
//! what the receiver is missing; resuming a completed transfer is a no-op.
//! Per-chunk failures retry with exponential backoff, bounded.

use crate::error::Result;
use crate::transfer::bitmap::ChunkBitmap;
use crate::transfer::state::{Status, TransferRecord};
use rand::Rng;
use std::time::Duration;

/// What a resume negotiation concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// Transfer already finished; nothing to send
    AlreadyComplete,
    /// Send exactly these chunk indices
    Retransmit(Vec<u64>),
}

/// Decide what to retransmit given the receiver's bitmap
///
/// The retransmitted set is exactly the receiver's missing set, so total
/// bytes resent are bounded by (total − progress) plus at most the one
/// chunk that was in flight when the transfer was interrupted.
pub fn negotiate(record: &TransferRecord, receiver_bitmap: &ChunkBitmap) -> Result<ResumeOutcome> {
    if record.status == Status::Completed || receiver_bitmap.is_complete() {
        return Ok(ResumeOutcome::AlreadyComplete);
    }
    Ok(ResumeOutcome::Retransmit(receiver_bitmap.missing()))
}

/// Bounded retry with exponential backoff and jitter
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts before giving up
    pub max_retries: u32,
    /// First backoff delay
    pub base: Duration,
    /// Ceiling for the exponential growth
    pub cap: Duration,
    /// Jitter added on top of the capped delay, as a fraction of it
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Backoff before attempt `n` (zero-based), `base * 2^n` capped, plus
    /// jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << attempt.min(16));
        let capped = exp.min(self.cap);
        let jitter_ms = (capped.as_millis() as f64 * self.jitter) as u64;
        let extra = if jitter_ms > 0 {
            rand::thread_rng().gen_range(0..jitter_ms)
        } else {
            0
        };
        capped + Duration::from_millis(extra)
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}
