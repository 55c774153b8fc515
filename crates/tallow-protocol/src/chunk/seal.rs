//! Per-chunk sealing and verification
//!
//! Each chunk is sealed with the transfer's data key under a counter
//! nonce. The AAD binds the chunk index and the file hash, so a frame can
//! never be replayed into a different slot or a different transfer. The
//! nonce counter and the chunk index advance independently: a retransmit
//! of chunk k gets a fresh nonce, never a reused one.

use crate::error::{ProtocolError, Result};
use crate::wire::frames::ChunkFrame;
use tallow_crypto::hash::blake3;
use tallow_crypto::mem::constant_time_equal;
use tallow_crypto::symmetric::nonce::Direction;
use tallow_crypto::symmetric::{Cipher, CipherSuite, NonceSequence};

/// A sealed chunk with its plaintext hash
#[derive(Debug, Clone)]
pub struct SealedChunk {
    /// The wire frame to transmit
    pub frame: ChunkFrame,
    /// BLAKE3 of the chunk plaintext (fed to the manifest and the root)
    pub hash: [u8; 32],
}

/// The sealing/opening side of one transfer direction
pub struct TransferCipher {
    cipher: Cipher,
    nonces: NonceSequence,
    file_hash: [u8; 32],
}

/// AAD layout: big-endian chunk index followed by the file hash
fn chunk_aad(index: u64, file_hash: &[u8; 32]) -> [u8; 40] {
    let mut aad = [0u8; 40];
    aad[..8].copy_from_slice(&index.to_be_bytes());
    aad[8..].copy_from_slice(file_hash);
    aad
}

impl TransferCipher {
    /// Bind a data key to one transfer direction
    ///
    /// `file_hash` is the transfer's Merkle root commitment used for AAD
    /// binding (the sender's advertised root).
    pub fn new(
        suite: CipherSuite,
        data_key: &[u8; 32],
        direction: Direction,
        file_hash: [u8; 32],
    ) -> Self {
        Self {
            cipher: Cipher::new(suite, data_key),
            nonces: NonceSequence::new(direction),
            file_hash,
        }
    }

    /// Seal a chunk, producing the wire frame and the chunk hash
    pub fn seal_chunk(&mut self, index: u64, plaintext: &[u8]) -> Result<SealedChunk> {
        let hash = blake3::hash(plaintext);
        let nonce = self.nonces.next()?;
        let aad = chunk_aad(index, &self.file_hash);
        let ciphertext = self.cipher.seal(&nonce, plaintext, &aad)?;

        Ok(SealedChunk {
            frame: ChunkFrame {
                index,
                nonce,
                ciphertext,
            },
            hash,
        })
    }

    /// Open a chunk frame and verify its plaintext hash
    ///
    /// Tag verification happens first; only then is the plaintext hashed
    /// and compared - in constant time - against the expected hash from
    /// the manifest.
    pub fn open_chunk(&self, frame: &ChunkFrame, expected_hash: &[u8; 32]) -> Result<Vec<u8>> {
        let aad = chunk_aad(frame.index, &self.file_hash);
        let plaintext = self.cipher.open(&frame.nonce, &frame.ciphertext, &aad)?;

        let actual = blake3::hash(&plaintext);
        if !constant_time_equal(&actual, expected_hash) {
            return Err(ProtocolError::Crypto(
                tallow_crypto::CryptoError::HashMismatch {
                    expected: hex::encode(expected_hash),
                    actual: hex::encode(actual),
                },
            ));
        }

        Ok(plaintext)
    }

    /// Nonce counter position (persisted for resume)
    pub fn nonce_counter(&self) -> u64 {
        self.nonces.counter()
    }

    /// Fast-forward the nonce counter when resuming a transfer
    pub fn resume_nonces_at(&mut self, counter: u64) -> Result<()> {
        self.nonces.resume_at(counter)?;
        Ok(())
    }
}

impl std::fmt::Debug for TransferCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferCipher")
            .field("nonces", &self.nonces)
            .finish()
    }
}

/// Compute the transfer root over ordered per-chunk hashes
///
/// The empty transfer (zero chunks) hashes to `BLAKE3("")`.
pub fn finalize(chunk_hashes: &[[u8; 32]]) -> [u8; 32] {
    tallow_crypto::hash::merkle::root_of(chunk_hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(file_hash: [u8; 32]) -> (TransferCipher, TransferCipher) {
        let key = [0x42u8; 32];
        (
            TransferCipher::new(CipherSuite::default(), &key, Direction::Send, file_hash),
            TransferCipher::new(CipherSuite::default(), &key, Direction::Send, file_hash),
        )
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (mut sender, receiver) = pair([7u8; 32]);
        let sealed = sender.seal_chunk(3, b"chunk payload").unwrap();
        let plaintext = receiver.open_chunk(&sealed.frame, &sealed.hash).unwrap();
        assert_eq!(plaintext, b"chunk payload");
    }

    #[test]
    fn test_nonce_advances_per_seal() {
        let (mut sender, _) = pair([0u8; 32]);
        let a = sender.seal_chunk(0, b"a").unwrap();
        let b = sender.seal_chunk(0, b"a").unwrap(); // retransmit, same index
        assert_ne!(a.frame.nonce, b.frame.nonce);
        assert_eq!(sender.nonce_counter(), 2);
    }

    #[test]
    fn test_index_is_bound_by_aad() {
        let (mut sender, receiver) = pair([7u8; 32]);
        let sealed = sender.seal_chunk(3, b"payload").unwrap();
        let mut moved = sealed.frame.clone();
        moved.index = 4;
        assert!(receiver.open_chunk(&moved, &sealed.hash).is_err());
    }

    #[test]
    fn test_file_hash_is_bound_by_aad() {
        let key = [0x42u8; 32];
        let mut sender =
            TransferCipher::new(CipherSuite::default(), &key, Direction::Send, [1u8; 32]);
        let receiver =
            TransferCipher::new(CipherSuite::default(), &key, Direction::Send, [2u8; 32]);
        let sealed = sender.seal_chunk(0, b"payload").unwrap();
        assert!(receiver.open_chunk(&sealed.frame, &sealed.hash).is_err());
    }

    #[test]
    fn test_hash_mismatch_detected() {
        let (mut sender, receiver) = pair([7u8; 32]);
        let sealed = sender.seal_chunk(0, b"payload").unwrap();
        let wrong_hash = blake3::hash(b"other payload");
        assert!(receiver.open_chunk(&sealed.frame, &wrong_hash).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_rejected_before_hashing() {
        let (mut sender, receiver) = pair([7u8; 32]);
        let mut sealed = sender.seal_chunk(0, b"payload").unwrap();
        sealed.frame.ciphertext[0] ^= 1;
        assert!(matches!(
            receiver.open_chunk(&sealed.frame, &sealed.hash),
            Err(ProtocolError::Crypto(
                tallow_crypto::CryptoError::TagMismatch
            ))
        ));
    }

    #[test]
    fn test_finalize_empty_is_blake3_empty() {
        assert_eq!(finalize(&[]), blake3::hash(b""));
    }

    #[test]
    fn test_resume_nonces() {
        let (mut sender, _) = pair([0u8; 32]);
        sender.resume_nonces_at(500).unwrap();
        let sealed = sender.seal_chunk(0, b"x").unwrap();
        assert_eq!(
            u64::from_be_bytes(sealed.frame.nonce[4..].try_into().unwrap()),
            500
        );
    }
}
