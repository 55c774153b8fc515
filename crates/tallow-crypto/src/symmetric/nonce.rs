//! Counter-based nonce sequences
//!
//! 96-bit nonces laid out as `[4-byte direction tag][8-byte big-endian
//! counter]`. Nonces are never random and never reused: the counter is
//! strictly monotonic per (key, direction), and exhaustion is an error
//! rather than a wrap.

use crate::error::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

/// Direction of a nonce sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Initiator-to-responder traffic
    Send,
    /// Responder-to-initiator traffic
    Receive,
}

impl Direction {
    /// The 4-byte tag occupying the high bytes of the nonce
    pub fn tag(self) -> [u8; 4] {
        match self {
            Direction::Send => *b"TLWS",
            Direction::Receive => *b"TLWR",
        }
    }

    /// The opposite direction
    pub fn flip(self) -> Self {
        match self {
            Direction::Send => Direction::Receive,
            Direction::Receive => Direction::Send,
        }
    }
}

/// Compose a nonce from a direction tag and counter value
pub fn compose(direction: Direction, counter: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&direction.tag());
    nonce[4..].copy_from_slice(&counter.to_be_bytes());
    nonce
}

/// A strictly monotonic nonce sequence for one direction
#[derive(Clone, Serialize, Deserialize)]
pub struct NonceSequence {
    direction: Direction,
    counter: u64,
}

impl Zeroize for NonceSequence {
    fn zeroize(&mut self) {
        self.counter.zeroize();
    }
}

impl NonceSequence {
    /// Start a fresh sequence at counter zero
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            counter: 0,
        }
    }

    /// Produce the next nonce and advance the counter
    ///
    /// Returns [`CryptoError::NonceExhausted`] once the 64-bit counter
    /// space is spent; the key must be rotated, never the counter reset.
    pub fn next(&mut self) -> Result<[u8; 12]> {
        if self.counter == u64::MAX {
            return Err(CryptoError::NonceExhausted);
        }
        let nonce = compose(self.direction, self.counter);
        self.counter += 1;
        Ok(nonce)
    }

    /// Current counter value (the next nonce to be issued)
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// The direction of this sequence
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Advance the counter for session resume
    ///
    /// Only ever moves forward; an attempt to move backward is rejected
    /// because it would reuse a (key, nonce) pair.
    pub fn resume_at(&mut self, counter: u64) -> Result<()> {
        if counter < self.counter {
            return Err(CryptoError::InvalidNonce(format!(
                "resume counter {} below current {}",
                counter, self.counter
            )));
        }
        self.counter = counter;
        Ok(())
    }
}

impl std::fmt::Debug for NonceSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceSequence")
            .field("direction", &self.direction)
            .field("counter", &self.counter)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nonce_layout() {
        let nonce = compose(Direction::Send, 0x0102030405060708);
        assert_eq!(&nonce[..4], b"TLWS");
        assert_eq!(&nonce[4..], &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_monotonic() {
        let mut seq = NonceSequence::new(Direction::Send);
        let a = seq.next().unwrap();
        let b = seq.next().unwrap();
        assert_ne!(a, b);
        assert_eq!(seq.counter(), 2);
    }

    #[test]
    fn test_directions_never_collide() {
        let mut send = NonceSequence::new(Direction::Send);
        let mut recv = NonceSequence::new(Direction::Receive);
        // Same counters, different tags
        for _ in 0..64 {
            assert_ne!(send.next().unwrap(), recv.next().unwrap());
        }
    }

    #[test]
    fn test_exhaustion_is_error() {
        let mut seq = NonceSequence::new(Direction::Send);
        seq.resume_at(u64::MAX).unwrap();
        assert_eq!(seq.next(), Err(CryptoError::NonceExhausted));
    }

    #[test]
    fn test_resume_never_rewinds() {
        let mut seq = NonceSequence::new(Direction::Send);
        seq.resume_at(100).unwrap();
        assert!(seq.resume_at(50).is_err());
        assert_eq!(seq.counter(), 100);
    }
}
