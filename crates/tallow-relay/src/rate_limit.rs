//! Per-IP rate limiting and per-room join lockout

use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Fixed-window per-IP request limiter
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    window: Duration,
    state: DashMap<IpAddr, (u32, Instant)>,
}

impl RateLimiter {
    /// Allow `limit` requests per `window` per IP
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            state: DashMap::new(),
        }
    }

    /// Record a request; true when within budget
    pub fn check(&self, ip: IpAddr) -> bool {
        self.check_at(ip, Instant::now())
    }

    fn check_at(&self, ip: IpAddr, now: Instant) -> bool {
        let mut entry = self.state.entry(ip).or_insert((0, now));
        let (count, window_start) = *entry;
        if now.duration_since(window_start) >= self.window {
            *entry = (1, now);
            return true;
        }
        if count < self.limit {
            *entry = (count + 1, window_start);
            true
        } else {
            false
        }
    }

    /// Drop windows that expired (housekeeping)
    pub fn prune(&self) {
        let now = Instant::now();
        let window = self.window;
        self.state
            .retain(|_, (_, started)| now.duration_since(*started) < window);
    }
}

/// Tracks failed joins per room and locks hot rooms out
#[derive(Debug)]
pub struct JoinLockout {
    threshold: u32,
    duration: Duration,
    state: DashMap<[u8; 32], (u32, Option<Instant>)>,
}

impl JoinLockout {
    /// Lock a room for `duration` after `threshold` failed joins
    pub fn new(threshold: u32, duration: Duration) -> Self {
        Self {
            threshold,
            duration,
            state: DashMap::new(),
        }
    }

    /// Is this room currently locked out?
    pub fn is_locked(&self, code_hash: &[u8; 32]) -> bool {
        self.is_locked_at(code_hash, Instant::now())
    }

    fn is_locked_at(&self, code_hash: &[u8; 32], now: Instant) -> bool {
        if let Some(entry) = self.state.get(code_hash) {
            if let (_, Some(locked_at)) = *entry {
                return now.duration_since(locked_at) < self.duration;
            }
        }
        false
    }

    /// Record a failed join; returns true when this failure locked the room
    pub fn record_failure(&self, code_hash: [u8; 32]) -> bool {
        let now = Instant::now();
        let mut entry = self.state.entry(code_hash).or_insert((0, None));
        let (count, locked) = *entry;
        // Expired lock resets the counter
        if let Some(locked_at) = locked {
            if now.duration_since(locked_at) >= self.duration {
                *entry = (1, None);
                return false;
            }
            return false;
        }
        let count = count + 1;
        if count >= self.threshold {
            *entry = (count, Some(now));
            true
        } else {
            *entry = (count, None);
            false
        }
    }

    /// A successful join clears the failure history
    pub fn record_success(&self, code_hash: &[u8; 32]) {
        self.state.remove(code_hash);
    }

    /// Drop expired entries
    pub fn prune(&self) {
        let now = Instant::now();
        let duration = self.duration;
        self.state.retain(|_, (_, locked)| match locked {
            Some(locked_at) => now.duration_since(*locked_at) < duration,
            None => true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip() -> IpAddr {
        "203.0.113.1".parse().unwrap()
    }

    #[test]
    fn test_limit_enforced_within_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.check(ip()));
        assert!(limiter.check(ip()));
        assert!(limiter.check(ip()));
        assert!(!limiter.check(ip()));
    }

    #[test]
    fn test_window_reset() {
        let limiter = RateLimiter::new(1, Duration::from_millis(0));
        assert!(limiter.check(ip()));
        // Zero-length window: next request starts a new window
        assert!(limiter.check(ip()));
    }

    #[test]
    fn test_per_ip_isolation() {
        let limiter = RateLimiter::new(1, Duration::from_secs(60));
        assert!(limiter.check("203.0.113.1".parse().unwrap()));
        assert!(limiter.check("203.0.113.2".parse().unwrap()));
        assert!(!limiter.check("203.0.113.1".parse().unwrap()));
    }

    #[test]
    fn test_lockout_after_threshold() {
        let lockout = JoinLockout::new(3, Duration::from_secs(600));
        let room = [1u8; 32];
        assert!(!lockout.record_failure(room));
        assert!(!lockout.record_failure(room));
        assert!(lockout.record_failure(room));
        assert!(lockout.is_locked(&room));
        // Other rooms unaffected
        assert!(!lockout.is_locked(&[2u8; 32]));
    }

    #[test]
    fn test_success_clears_failures() {
        let lockout = JoinLockout::new(3, Duration::from_secs(600));
        let room = [1u8; 32];
        lockout.record_failure(room);
        lockout.record_failure(room);
        lockout.record_success(&room);
        assert!(!lockout.record_failure(room));
        assert!(!lockout.is_locked(&room));
    }
}
