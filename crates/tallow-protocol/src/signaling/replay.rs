//! Replay protection for signaling envelopes
//!
//! Both the server and the peers keep a 30-second window of (from, nonce)
//! pairs. Duplicates within the window are rejected, as are envelopes
//! whose timestamp falls outside the window in either direction.

use crate::error::{ProtocolError, Result};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Replay window length
pub const REPLAY_WINDOW: Duration = Duration::from_secs(30);

/// Tracks recently-seen envelopes
#[derive(Debug)]
pub struct ReplayGuard {
    window: Duration,
    seen: HashMap<(String, String), Instant>,
}

impl ReplayGuard {
    /// Create a guard with the standard 30-second window
    pub fn new() -> Self {
        Self::with_window(REPLAY_WINDOW)
    }

    /// Create a guard with a custom window (tests)
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            seen: HashMap::new(),
        }
    }

    /// Admit an envelope or reject it as a replay / stale message
    ///
    /// `now_unix` is the local clock in unix seconds; `timestamp` is the
    /// envelope's claimed sealing time.
    pub fn check(&mut self, from: &str, nonce: &str, timestamp: u64, now_unix: u64) -> Result<()> {
        let skew = now_unix.abs_diff(timestamp);
        if skew > self.window.as_secs() {
            return Err(ProtocolError::EnvelopeRejected(format!(
                "timestamp skew {}s exceeds window",
                skew
            )));
        }

        self.prune(Instant::now());

        let key = (from.to_string(), nonce.to_string());
        if self.seen.contains_key(&key) {
            return Err(ProtocolError::EnvelopeRejected("replayed nonce".into()));
        }
        self.seen.insert(key, Instant::now());
        Ok(())
    }

    /// Drop entries older than the window
    pub fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.seen
            .retain(|_, inserted| now.duration_since(*inserted) <= window);
    }

    /// Entries currently tracked
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// True when nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

impl Default for ReplayGuard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_rejected() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check("alice", "n-1", 1000, 1000).is_ok());
        assert!(guard.check("alice", "n-1", 1000, 1001).is_err());
    }

    #[test]
    fn test_distinct_nonces_pass() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check("alice", "n-1", 1000, 1000).is_ok());
        assert!(guard.check("alice", "n-2", 1000, 1000).is_ok());
        assert!(guard.check("bob", "n-1", 1000, 1000).is_ok());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check("alice", "n-1", 900, 1000).is_err());
        // Future-dated equally rejected
        assert!(guard.check("alice", "n-2", 1100, 1000).is_err());
    }

    #[test]
    fn test_edge_of_window_accepted() {
        let mut guard = ReplayGuard::new();
        assert!(guard.check("alice", "n-1", 970, 1000).is_ok());
        assert!(guard.check("alice", "n-2", 1030, 1000).is_ok());
    }

    #[test]
    fn test_prune_clears_old_entries() {
        let mut guard = ReplayGuard::with_window(Duration::from_millis(0));
        guard.check("alice", "n-1", 1000, 1000).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        guard.prune(Instant::now());
        assert!(guard.is_empty());
    }
}
