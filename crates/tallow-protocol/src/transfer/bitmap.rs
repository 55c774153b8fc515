//! Per-transfer chunk bitmap
//!
//! Bit k records the acknowledged delivery of chunk k. The bitmap's bit
//! count always equals the transfer's total chunk count; serialization
//! packs eight chunks per byte.

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

/// Acknowledgement bitmap, one bit per chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkBitmap {
    total: u64,
    bits: Vec<u8>,
    set_count: u64,
}

impl ChunkBitmap {
    /// Create an all-clear bitmap for `total` chunks
    pub fn new(total: u64) -> Self {
        let bytes = (total as usize).div_ceil(8);
        Self {
            total,
            bits: vec![0u8; bytes],
            set_count: 0,
        }
    }

    /// Rebuild from packed bytes, validating the bit count
    pub fn from_bytes(total: u64, bytes: Vec<u8>) -> Result<Self> {
        let expected = (total as usize).div_ceil(8);
        if bytes.len() != expected {
            return Err(ProtocolError::Validation(format!(
                "bitmap length {} does not cover {} chunks",
                bytes.len(),
                total
            )));
        }
        // Bits past `total` in the final byte must be clear
        if total % 8 != 0 {
            if let Some(last) = bytes.last() {
                let valid = total % 8;
                if last >> valid != 0 {
                    return Err(ProtocolError::Validation(
                        "bitmap has bits set past the chunk count".into(),
                    ));
                }
            }
        }
        let set_count = bytes.iter().map(|b| b.count_ones() as u64).sum();
        Ok(Self {
            total,
            bits: bytes,
            set_count,
        })
    }

    /// Packed bytes for transmission or persistence
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// Total chunks tracked
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Chunks acknowledged so far
    pub fn set_count(&self) -> u64 {
        self.set_count
    }

    /// Mark chunk `index` delivered; idempotent
    pub fn set(&mut self, index: u64) -> Result<()> {
        if index >= self.total {
            return Err(ProtocolError::ChunkOutOfRange {
                index,
                total: self.total,
            });
        }
        let byte = (index / 8) as usize;
        let bit = 1u8 << (index % 8);
        if self.bits[byte] & bit == 0 {
            self.bits[byte] |= bit;
            self.set_count += 1;
        }
        Ok(())
    }

    /// Is chunk `index` acknowledged?
    pub fn get(&self, index: u64) -> bool {
        if index >= self.total {
            return false;
        }
        let byte = (index / 8) as usize;
        let bit = 1u8 << (index % 8);
        self.bits[byte] & bit != 0
    }

    /// Every chunk acknowledged (trivially true for an empty transfer)
    pub fn is_complete(&self) -> bool {
        self.set_count == self.total
    }

    /// Indices still pending, in order
    pub fn missing(&self) -> Vec<u64> {
        (0..self.total).filter(|i| !self.get(*i)).collect()
    }

    /// Indices pending among the first `limit`, for windowed scheduling
    pub fn missing_up_to(&self, limit: u64) -> Vec<u64> {
        (0..self.total.min(limit)).filter(|i| !self.get(*i)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transfer_is_complete() {
        let bitmap = ChunkBitmap::new(0);
        assert!(bitmap.is_complete());
        assert!(bitmap.missing().is_empty());
    }

    #[test]
    fn test_set_get_count() {
        let mut bitmap = ChunkBitmap::new(10);
        assert!(!bitmap.get(3));
        bitmap.set(3).unwrap();
        assert!(bitmap.get(3));
        assert_eq!(bitmap.set_count(), 1);

        // Idempotent
        bitmap.set(3).unwrap();
        assert_eq!(bitmap.set_count(), 1);
    }

    #[test]
    fn test_out_of_range_set_rejected() {
        let mut bitmap = ChunkBitmap::new(10);
        assert!(bitmap.set(10).is_err());
    }

    #[test]
    fn test_completion() {
        let mut bitmap = ChunkBitmap::new(9);
        for i in 0..9 {
            bitmap.set(i).unwrap();
        }
        assert!(bitmap.is_complete());
    }

    #[test]
    fn test_missing() {
        let mut bitmap = ChunkBitmap::new(6);
        bitmap.set(0).unwrap();
        bitmap.set(2).unwrap();
        bitmap.set(5).unwrap();
        assert_eq!(bitmap.missing(), vec![1, 3, 4]);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut bitmap = ChunkBitmap::new(13);
        bitmap.set(0).unwrap();
        bitmap.set(7).unwrap();
        bitmap.set(12).unwrap();
        let rebuilt = ChunkBitmap::from_bytes(13, bitmap.as_bytes().to_vec()).unwrap();
        assert_eq!(rebuilt, bitmap);
    }

    proptest::proptest! {
        #[test]
        fn prop_bytes_roundtrip(
            total in 0u64..512,
            seed in proptest::collection::vec(0u64.., 0..64),
        ) {
            let mut bitmap = ChunkBitmap::new(total);
            for s in seed {
                if total > 0 {
                    bitmap.set(s % total).unwrap();
                }
            }
            let rebuilt = ChunkBitmap::from_bytes(total, bitmap.as_bytes().to_vec()).unwrap();
            proptest::prop_assert_eq!(rebuilt, bitmap);
        }
    }

    #[test]
    fn test_from_bytes_rejects_wrong_length() {
        assert!(ChunkBitmap::from_bytes(13, vec![0u8; 1]).is_err());
    }

    #[test]
    fn test_from_bytes_rejects_stray_bits() {
        // 13 chunks need 2 bytes; bits 13..16 must be clear
        assert!(ChunkBitmap::from_bytes(13, vec![0xFF, 0xFF]).is_err());
        assert!(ChunkBitmap::from_bytes(13, vec![0xFF, 0x1F]).is_ok());
    }
}
