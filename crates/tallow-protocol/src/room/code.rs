//! Human-readable room codes
//!
//! Eight characters from a 32-symbol alphabet (digits and capitals with
//! 0, O, I, and L removed) give 40 bits of CSPRNG entropy - above the
//! 36-bit floor, and small enough to read over a phone. The relay only
//! ever indexes rooms by the code's BLAKE3 hash.

use crate::error::{ProtocolError, Result};
use rand::RngCore;
use tallow_crypto::hash::blake3;
use tallow_crypto::mem::constant_time_equal;

/// Code alphabet: visually unambiguous digits and capitals
pub const ALPHABET: &[u8; 32] = b"123456789ABCDEFGHJKMNPQRSTUVWXYZ";

/// Generated code length
pub const CODE_LEN: usize = 8;

/// Accepted code lengths when parsing (older peers used 6)
const MIN_LEN: usize = 6;
const MAX_LEN: usize = 8;

/// Room lifetime: codes die with the room, at the latest after 24 hours
pub const ROOM_TTL_SECS: u64 = 24 * 60 * 60;

/// A validated room code
#[derive(Clone, PartialEq, Eq)]
pub struct RoomCode(String);

impl RoomCode {
    /// Generate a fresh code from the CSPRNG
    pub fn generate() -> Self {
        let mut bytes = [0u8; CODE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        let code: String = bytes
            .iter()
            .map(|b| ALPHABET[(*b % 32) as usize] as char)
            .collect();
        Self(code)
    }

    /// Parse and normalize user input
    ///
    /// Lowercase is accepted and uppercased; the easily-confused glyphs
    /// map to their canonical counterparts (0→O is invalid since O is
    /// excluded, so 0/O and 1/I/L all reject - they can never appear in a
    /// generated code).
    pub fn parse(input: &str) -> Result<Self> {
        let normalized: String = input.trim().to_uppercase();
        if normalized.len() < MIN_LEN || normalized.len() > MAX_LEN {
            return Err(ProtocolError::Validation(format!(
                "room code must be {}-{} characters",
                MIN_LEN, MAX_LEN
            )));
        }
        for c in normalized.bytes() {
            if !ALPHABET.contains(&c) {
                return Err(ProtocolError::Validation(format!(
                    "room code contains invalid character '{}'",
                    c as char
                )));
            }
        }
        Ok(Self(normalized))
    }

    /// The code string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// BLAKE3 hash - the only form the relay and signaling server see
    pub fn hash(&self) -> [u8; 32] {
        blake3::hash(self.0.as_bytes())
    }

    /// Constant-time comparison against another code
    pub fn matches(&self, other: &RoomCode) -> bool {
        constant_time_equal(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl std::fmt::Display for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::fmt::Debug for RoomCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Codes are secrets until the room closes
        f.write_str("RoomCode<REDACTED>")
    }
}

impl std::str::FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_codes_are_valid() {
        for _ in 0..100 {
            let code = RoomCode::generate();
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(RoomCode::parse(code.as_str()).is_ok());
        }
    }

    #[test]
    fn test_no_ambiguous_characters() {
        for _ in 0..200 {
            let code = RoomCode::generate();
            for banned in ['0', 'O', 'I', 'L'] {
                assert!(!code.as_str().contains(banned), "{}", code.as_str());
            }
        }
    }

    #[test]
    fn test_parse_normalizes_case() {
        let code = RoomCode::parse("k7n2p4qx").unwrap();
        assert_eq!(code.as_str(), "K7N2P4QX");
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(RoomCode::parse("SHORT").is_err());
        assert!(RoomCode::parse("WAYTOOLONGCODE").is_err());
        assert!(RoomCode::parse("K7N2P40X").is_err()); // contains 0
        assert!(RoomCode::parse("K7N2P4IX").is_err()); // contains I
        assert!(RoomCode::parse("K7N2 P4X").is_err()); // whitespace inside
    }

    #[test]
    fn test_collisions_are_rare() {
        // 40 bits of entropy: 10k draws collide with probability ~2^-14
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(RoomCode::generate().as_str().to_string()));
        }
    }

    #[test]
    fn test_hash_is_stable_and_code_specific() {
        let a = RoomCode::parse("K7N2P4QX").unwrap();
        let b = RoomCode::parse("K7N2P4QX").unwrap();
        let c = RoomCode::parse("K7N2P4QY").unwrap();
        assert_eq!(a.hash(), b.hash());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_debug_redacts() {
        let code = RoomCode::generate();
        assert_eq!(format!("{:?}", code), "RoomCode<REDACTED>");
    }
}
