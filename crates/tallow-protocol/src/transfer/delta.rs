//! Block-level delta synchronization
//!
//! For a repeated transfer of a file the receiver already holds a version
//! of, the receiver computes fixed-size block signatures and sends them;
//! the sender replies with only the blocks that differ. Signatures pair a
//! cheap rolling checksum (prefilter) with SHA-256 (decision).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Read;

/// One mebibyte
const MIB: u64 = 1024 * 1024;

/// Delta-sync tunables
#[derive(Debug, Clone, Copy)]
pub struct DeltaConfig {
    /// Block size override; None picks from the file-size heuristic
    pub block_size: Option<u64>,
}

impl Default for DeltaConfig {
    fn default() -> Self {
        Self { block_size: None }
    }
}

impl DeltaConfig {
    /// Block size for a file
    ///
    /// Heuristic: 1 MiB for files up to 100 MiB, then file_size/100
    /// rounded up to a whole MiB, capped at 4 MiB.
    pub fn block_size_for(&self, file_size: u64) -> u64 {
        if let Some(size) = self.block_size {
            return size;
        }
        if file_size <= 100 * MIB {
            MIB
        } else {
            let scaled = (file_size / 100).div_ceil(MIB) * MIB;
            scaled.min(4 * MIB)
        }
    }
}

/// Signature of one fixed-size block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSignature {
    /// Block index
    pub index: u64,
    /// Actual block length (short only for the final block)
    pub len: u32,
    /// Rolling checksum prefilter
    pub weak: u32,
    /// SHA-256 of the block
    pub strong: [u8; 32],
}

/// Adler-style rolling checksum over a block
fn weak_sum(data: &[u8]) -> u32 {
    let mut a: u32 = 0;
    let mut b: u32 = 0;
    for &byte in data {
        a = a.wrapping_add(byte as u32);
        b = b.wrapping_add(a);
    }
    (a & 0xFFFF) | (b << 16)
}

/// SHA-256 of a block
fn strong_sum(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Compute signatures over a reader
pub fn compute_signatures<R: Read>(mut reader: R, block_size: u64) -> Result<Vec<BlockSignature>> {
    let mut signatures = Vec::new();
    let mut buf = vec![0u8; block_size as usize];
    let mut index = 0u64;

    loop {
        let mut filled = 0usize;
        while filled < buf.len() {
            let n = reader.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        if filled == 0 {
            break;
        }
        let block = &buf[..filled];
        signatures.push(BlockSignature {
            index,
            len: filled as u32,
            weak: weak_sum(block),
            strong: strong_sum(block),
        });
        index += 1;
        if filled < buf.len() {
            break;
        }
    }

    Ok(signatures)
}

/// Block indices of the new file that must be transmitted
///
/// A block is sent when the receiver has no signature for that index, the
/// lengths differ, or the checksums disagree. The weak sum short-circuits
/// the strong comparison for unchanged blocks only as an ordering detail;
/// the decision is always confirmed by SHA-256.
pub fn changed_blocks(
    new_signatures: &[BlockSignature],
    receiver_signatures: &[BlockSignature],
) -> Vec<u64> {
    new_signatures
        .iter()
        .filter(|new| {
            match receiver_signatures.iter().find(|r| r.index == new.index) {
                None => true,
                Some(old) => {
                    old.len != new.len || old.weak != new.weak || old.strong != new.strong
                }
            }
        })
        .map(|sig| sig.index)
        .collect()
}

/// Serialize a signature list for the `DeltaSignatures` control frame
pub fn encode_signatures(signatures: &[BlockSignature]) -> Result<Vec<u8>> {
    Ok(postcard::to_stdvec(signatures)?)
}

/// Parse a signature list from a control frame
pub fn decode_signatures(bytes: &[u8]) -> Result<Vec<BlockSignature>> {
    Ok(postcard::from_bytes(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_block_size_heuristic() {
        let cfg = DeltaConfig::default();
        assert_eq!(cfg.block_size_for(10 * MIB), MIB);
        assert_eq!(cfg.block_size_for(100 * MIB), MIB);
        assert_eq!(cfg.block_size_for(200 * MIB), 2 * MIB);
        assert_eq!(cfg.block_size_for(399 * MIB), 4 * MIB);
        // Capped at 4 MiB no matter how large
        assert_eq!(cfg.block_size_for(100_000 * MIB), 4 * MIB);
    }

    #[test]
    fn test_block_size_override() {
        let cfg = DeltaConfig {
            block_size: Some(512 * 1024),
        };
        assert_eq!(cfg.block_size_for(10_000 * MIB), 512 * 1024);
    }

    #[test]
    fn test_signatures_cover_file() {
        let data = vec![7u8; 2 * MIB as usize + 100];
        let sigs = compute_signatures(Cursor::new(&data), MIB).unwrap();
        assert_eq!(sigs.len(), 3);
        assert_eq!(sigs[2].len, 100);
    }

    #[test]
    fn test_identical_files_need_nothing() {
        let data: Vec<u8> = (0..MIB as usize * 3).map(|i| (i % 251) as u8).collect();
        let a = compute_signatures(Cursor::new(&data), MIB).unwrap();
        let b = compute_signatures(Cursor::new(&data), MIB).unwrap();
        assert!(changed_blocks(&a, &b).is_empty());
    }

    #[test]
    fn test_small_edit_sends_one_block() {
        let mut data: Vec<u8> = (0..MIB as usize * 10).map(|i| (i % 251) as u8).collect();
        let old = compute_signatures(Cursor::new(&data), MIB).unwrap();

        // A 100-byte edit inside block 4
        let offset = 4 * MIB as usize + 12345;
        for b in &mut data[offset..offset + 100] {
            *b ^= 0x5A;
        }
        let new = compute_signatures(Cursor::new(&data), MIB).unwrap();

        assert_eq!(changed_blocks(&new, &old), vec![4]);
    }

    #[test]
    fn test_appended_data_sends_tail_blocks() {
        let data: Vec<u8> = vec![1u8; 2 * MIB as usize];
        let old = compute_signatures(Cursor::new(&data), MIB).unwrap();

        let mut grown = data.clone();
        grown.extend_from_slice(&vec![2u8; MIB as usize]);
        let new = compute_signatures(Cursor::new(&grown), MIB).unwrap();

        assert_eq!(changed_blocks(&new, &old), vec![2]);
    }

    #[test]
    fn test_truncated_final_block_change_detected() {
        let data: Vec<u8> = vec![1u8; MIB as usize + 500];
        let old = compute_signatures(Cursor::new(&data), MIB).unwrap();

        let shorter: Vec<u8> = vec![1u8; MIB as usize + 100];
        let new = compute_signatures(Cursor::new(&shorter), MIB).unwrap();

        assert_eq!(changed_blocks(&new, &old), vec![1]);
    }

    #[test]
    fn test_signature_wire_roundtrip() {
        let data = vec![9u8; MIB as usize * 2];
        let sigs = compute_signatures(Cursor::new(&data), MIB).unwrap();
        let bytes = encode_signatures(&sigs).unwrap();
        assert_eq!(decode_signatures(&bytes).unwrap(), sigs);
    }

    #[test]
    fn test_empty_file_has_no_signatures() {
        let sigs = compute_signatures(Cursor::new(&[]), MIB).unwrap();
        assert!(sigs.is_empty());
    }
}
