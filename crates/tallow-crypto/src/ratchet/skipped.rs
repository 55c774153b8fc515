//! Bounded cache of skipped message keys
//!
//! Out-of-order delivery leaves gaps in the receive chain; the keys for
//! the not-yet-seen counters are parked here. The cache is bounded, and
//! every key leaving it - by use, eviction, or drop - is wiped.

use std::collections::{HashMap, VecDeque};
use zeroize::Zeroize;

/// Cache key: (chain id, counter within chain)
type Slot = (u64, u64);

/// FIFO-bounded store of skipped message keys
pub struct SkippedKeys {
    cap: usize,
    map: HashMap<Slot, [u8; 32]>,
    order: VecDeque<Slot>,
}

impl SkippedKeys {
    /// Create a cache holding at most `cap` keys
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Park a message key; the oldest entry is wiped and evicted at capacity
    pub fn insert(&mut self, chain_id: u64, counter: u64, key: [u8; 32]) {
        if self.cap == 0 {
            let mut key = key;
            key.zeroize();
            return;
        }
        while self.map.len() >= self.cap {
            if let Some(oldest) = self.order.pop_front() {
                if let Some(mut evicted) = self.map.remove(&oldest) {
                    evicted.zeroize();
                }
            } else {
                break;
            }
        }
        let slot = (chain_id, counter);
        if self.map.insert(slot, key).is_none() {
            self.order.push_back(slot);
        }
    }

    /// Remove and return the key for a slot; keys are single-use
    pub fn take(&mut self, chain_id: u64, counter: u64) -> Option<[u8; 32]> {
        let slot = (chain_id, counter);
        let key = self.map.remove(&slot)?;
        self.order.retain(|s| *s != slot);
        Some(key)
    }

    /// Number of parked keys
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when no keys are parked
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl Drop for SkippedKeys {
    fn drop(&mut self) {
        for (_, mut key) in self.map.drain() {
            key.zeroize();
        }
    }
}

impl std::fmt::Debug for SkippedKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SkippedKeys")
            .field("cap", &self.cap)
            .field("len", &self.map.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_take() {
        let mut cache = SkippedKeys::new(10);
        cache.insert(0, 5, [5u8; 32]);
        assert_eq!(cache.take(0, 5), Some([5u8; 32]));
        // Single use
        assert_eq!(cache.take(0, 5), None);
    }

    #[test]
    fn test_eviction_is_fifo() {
        let mut cache = SkippedKeys::new(3);
        for i in 0..5u64 {
            cache.insert(0, i, [i as u8; 32]);
        }
        assert_eq!(cache.len(), 3);
        // 0 and 1 were evicted
        assert_eq!(cache.take(0, 0), None);
        assert_eq!(cache.take(0, 1), None);
        assert_eq!(cache.take(0, 4), Some([4u8; 32]));
    }

    #[test]
    fn test_zero_capacity_stores_nothing() {
        let mut cache = SkippedKeys::new(0);
        cache.insert(0, 0, [1u8; 32]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_chains_are_distinct() {
        let mut cache = SkippedKeys::new(10);
        cache.insert(1, 7, [1u8; 32]);
        cache.insert(2, 7, [2u8; 32]);
        assert_eq!(cache.take(1, 7), Some([1u8; 32]));
        assert_eq!(cache.take(2, 7), Some([2u8; 32]));
    }
}
