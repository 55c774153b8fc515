//! Adaptive chunk-size tiers
//!
//! The tier is chosen per transfer by the transport's quality classifier
//! and fixed once the transfer begins; mid-transfer changes go through the
//! coordinated `ChunkSizeChange` control frame at a chunk boundary.

use serde::{Deserialize, Serialize};

/// Chunk-size tiers keyed to link quality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChunkSize {
    /// 16 KB - very poor links
    VeryPoor,
    /// 32 KB - poor links
    Poor,
    /// 64 KB - moderate links (default)
    Moderate,
    /// 128 KB - fast internet
    Fast,
    /// 256 KB - LAN
    Lan,
}

impl ChunkSize {
    /// The tier's chunk size in bytes
    pub fn bytes(self) -> usize {
        match self {
            ChunkSize::VeryPoor => 16 * 1024,
            ChunkSize::Poor => 32 * 1024,
            ChunkSize::Moderate => 64 * 1024,
            ChunkSize::Fast => 128 * 1024,
            ChunkSize::Lan => 256 * 1024,
        }
    }

    /// Classify from measured round-trip time and loss
    ///
    /// The decision key mirrors the transport's bandwidth monitor: loss
    /// dominates, then latency.
    pub fn for_link(rtt_ms: f64, loss: f64) -> Self {
        if loss > 0.05 || rtt_ms > 500.0 {
            ChunkSize::VeryPoor
        } else if loss > 0.02 || rtt_ms > 200.0 {
            ChunkSize::Poor
        } else if loss > 0.005 || rtt_ms > 80.0 {
            ChunkSize::Moderate
        } else if rtt_ms > 20.0 {
            ChunkSize::Fast
        } else {
            ChunkSize::Lan
        }
    }

    /// Parse a tier from an exact byte count (for the control frame)
    pub fn from_bytes(bytes: u32) -> Option<Self> {
        match bytes {
            16_384 => Some(ChunkSize::VeryPoor),
            32_768 => Some(ChunkSize::Poor),
            65_536 => Some(ChunkSize::Moderate),
            131_072 => Some(ChunkSize::Fast),
            262_144 => Some(ChunkSize::Lan),
            _ => None,
        }
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        ChunkSize::Moderate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_bytes() {
        assert_eq!(ChunkSize::VeryPoor.bytes(), 16 * 1024);
        assert_eq!(ChunkSize::Lan.bytes(), 256 * 1024);
        assert_eq!(ChunkSize::default().bytes(), 64 * 1024);
    }

    #[test]
    fn test_classification() {
        assert_eq!(ChunkSize::for_link(600.0, 0.0), ChunkSize::VeryPoor);
        assert_eq!(ChunkSize::for_link(10.0, 0.06), ChunkSize::VeryPoor);
        assert_eq!(ChunkSize::for_link(250.0, 0.0), ChunkSize::Poor);
        assert_eq!(ChunkSize::for_link(100.0, 0.0), ChunkSize::Moderate);
        assert_eq!(ChunkSize::for_link(50.0, 0.0), ChunkSize::Fast);
        assert_eq!(ChunkSize::for_link(2.0, 0.0), ChunkSize::Lan);
    }

    #[test]
    fn test_from_bytes_inverse() {
        for tier in [
            ChunkSize::VeryPoor,
            ChunkSize::Poor,
            ChunkSize::Moderate,
            ChunkSize::Fast,
            ChunkSize::Lan,
        ] {
            assert_eq!(ChunkSize::from_bytes(tier.bytes() as u32), Some(tier));
        }
        assert_eq!(ChunkSize::from_bytes(1234), None);
    }
}
