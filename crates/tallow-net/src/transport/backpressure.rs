//! Watermark backpressure
//!
//! A sender suspends once the channel's buffered bytes exceed the high
//! watermark and resumes only after the writer drains below the low
//! watermark. Waiting is event-driven through `Notify` - no polling
//! loops anywhere.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Suspend sends above this many buffered bytes
pub const HIGH_WATER: usize = 16 * 1024 * 1024;

/// Resume sends once buffered bytes drain below this
pub const LOW_WATER: usize = 4 * 1024 * 1024;

/// Shared buffered-byte accounting between a sender and its writer task
#[derive(Clone)]
pub struct Watermark {
    inner: Arc<Inner>,
}

struct Inner {
    buffered: AtomicUsize,
    /// Latched once the high watermark trips; cleared at the low watermark
    gated: AtomicBool,
    drained: Notify,
    high: usize,
    low: usize,
}

impl Watermark {
    /// Standard 16 MiB / 4 MiB watermarks
    pub fn new() -> Self {
        Self::with_limits(HIGH_WATER, LOW_WATER)
    }

    /// Custom watermarks (tests)
    pub fn with_limits(high: usize, low: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                buffered: AtomicUsize::new(0),
                gated: AtomicBool::new(false),
                drained: Notify::new(),
                high,
                low,
            }),
        }
    }

    /// Account for `bytes` about to be enqueued, suspending while gated
    pub async fn reserve(&self, bytes: usize) {
        loop {
            let gated = self.inner.gated.load(Ordering::Acquire);
            if !gated {
                let buffered = self.inner.buffered.fetch_add(bytes, Ordering::AcqRel) + bytes;
                if buffered > self.inner.high {
                    self.inner.gated.store(true, Ordering::Release);
                }
                return;
            }
            self.inner.drained.notified().await;
        }
    }

    /// Account for `bytes` having been written out
    pub fn release(&self, bytes: usize) {
        let mut current = self.inner.buffered.load(Ordering::Acquire);
        let after = loop {
            let next = current.saturating_sub(bytes);
            match self.inner.buffered.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break next,
                Err(actual) => current = actual,
            }
        };
        if after < self.inner.low && self.inner.gated.swap(false, Ordering::AcqRel) {
            self.inner.drained.notify_waiters();
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.inner.buffered.load(Ordering::Acquire)
    }

    /// True while senders are suspended
    pub fn is_gated(&self) -> bool {
        self.inner.gated.load(Ordering::Acquire)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Watermark {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watermark")
            .field("buffered", &self.buffered())
            .field("gated", &self.is_gated())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_below_high_water_never_blocks() {
        let wm = Watermark::with_limits(100, 20);
        for _ in 0..9 {
            wm.reserve(10).await;
        }
        assert_eq!(wm.buffered(), 90);
        assert!(!wm.is_gated());
    }

    #[tokio::test]
    async fn test_gate_trips_above_high_and_clears_below_low() {
        let wm = Watermark::with_limits(100, 20);
        wm.reserve(150).await;
        assert!(wm.is_gated());

        let blocked = {
            let wm = wm.clone();
            tokio::spawn(async move {
                wm.reserve(10).await;
            })
        };
        // Still gated: draining to 30 (above low) must not release
        wm.release(120);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!blocked.is_finished());

        // Draining below low releases the waiter
        wm.release(20);
        tokio::time::timeout(Duration::from_secs(1), blocked)
            .await
            .expect("sender should resume below low watermark")
            .unwrap();
        assert_eq!(wm.buffered(), 20);
    }

    #[tokio::test]
    async fn test_release_never_underflows() {
        let wm = Watermark::with_limits(100, 20);
        wm.reserve(10).await;
        wm.release(50);
        assert_eq!(wm.buffered(), 0);
    }
}
