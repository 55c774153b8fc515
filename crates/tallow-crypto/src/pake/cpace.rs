//! CPace balanced PAKE over Ristretto255
//!
//! Both peers hold the same low-entropy room code and derive a high-entropy
//! session key without the relay ever learning the code. The code is first
//! stretched with Argon2id, then hashed to a Ristretto group generator, so
//! an eavesdropper gains nothing it can grind offline.
//!
//! Failure shape: a wrong code is only detectable at the confirmation tag.
//! Every operation up to that point - generator derivation, scalar
//! multiplication, transcript KDF, tag computation - runs identically for
//! matching and mismatching codes, and the mismatch error carries no hint
//! of which side was wrong.

use crate::error::{CryptoError, Result};
use crate::hash::{blake3, domain};
use crate::kdf::password::{self, PasswordParams};
use crate::mem::constant_time_equal;
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use rand_core::OsRng;
use zeroize::{Zeroize, Zeroizing};

/// Role in the exchange; fixes transcript ordering and tag direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The peer that opened the room
    Initiator,
    /// The peer that joined with the code
    Responder,
}

/// One in-flight PAKE exchange
pub struct Pake {
    role: Role,
    scalar: Scalar,
    public: CompressedRistretto,
}

impl Drop for Pake {
    fn drop(&mut self) {
        self.scalar.zeroize();
    }
}

/// Fixed Argon2id salt for room-code stretching
///
/// The salt is public and identical for all rooms; uniqueness comes from
/// the session id folded into the generator derivation.
fn pake_salt() -> [u8; 16] {
    let digest = blake3::hash(domain::PAKE_V1.as_bytes());
    digest[..16].try_into().expect("16 of 32")
}

/// Derive the group generator from the stretched code and session context
fn derive_generator(stretched: &[u8; 32], session_id: &[u8]) -> RistrettoPoint {
    let mut input = Vec::with_capacity(domain::PAKE_V1.len() + 1 + 32 + 1 + session_id.len() + 1);
    input.extend_from_slice(domain::PAKE_V1.as_bytes());
    input.push(0x00);
    input.extend_from_slice(stretched);
    input.push(0x00);
    input.extend_from_slice(session_id);

    // Two hashes give the 64 uniform bytes Ristretto wants
    let h1 = blake3::hash(&input);
    input.push(0x01);
    let h2 = blake3::hash(&input);
    input.zeroize();

    let mut wide = [0u8; 64];
    wide[..32].copy_from_slice(&h1);
    wide[32..].copy_from_slice(&h2);

    let point = RistrettoPoint::from_uniform_bytes(&wide);
    wide.zeroize();
    point
}

impl Pake {
    /// Start an exchange from a room code
    ///
    /// # Arguments
    ///
    /// * `role` - Initiator or responder
    /// * `room_code` - The shared low-entropy code
    /// * `session_id` - Channel-binding context (e.g. the room-code hash the
    ///   relay indexed the room by)
    /// * `params` - Argon2id cost parameters for code stretching
    pub fn new(
        role: Role,
        room_code: &str,
        session_id: &[u8],
        params: PasswordParams,
    ) -> Result<Self> {
        let stretched = Zeroizing::new(password::derive(
            room_code.as_bytes(),
            &pake_salt(),
            params,
        )?);
        let generator = derive_generator(&stretched, session_id);

        let scalar = Scalar::random(&mut OsRng);
        let public = (scalar * generator).compress();

        Ok(Self {
            role,
            scalar,
            public,
        })
    }

    /// The 32-byte public message to send to the peer
    pub fn public_message(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Complete the exchange with the peer's public message
    ///
    /// Both sides derive the same [`PakeKey`] when and only when they
    /// started from the same room code.
    pub fn finish(self, their_public: &[u8]) -> Result<PakeKey> {
        let their_bytes: [u8; 32] = their_public
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("PAKE public message must be 32 bytes".into()))?;

        let their_point = CompressedRistretto(their_bytes)
            .decompress()
            .ok_or(CryptoError::PakeFailure)?;

        let shared_point = self.scalar * their_point;
        let mut shared_bytes = shared_point.compress().to_bytes();

        // Transcript ordering is fixed by role: initiator public first
        let (first, second) = match self.role {
            Role::Initiator => (self.public.to_bytes(), their_bytes),
            Role::Responder => (their_bytes, self.public.to_bytes()),
        };

        let mut transcript = Vec::with_capacity(32 * 3);
        transcript.extend_from_slice(&first);
        transcript.extend_from_slice(&second);
        transcript.extend_from_slice(&shared_bytes);

        let session_key = blake3::derive_key(domain::PAKE_SESSION, &transcript);

        shared_bytes.zeroize();
        transcript.zeroize();

        Ok(PakeKey { session_key })
    }
}

impl std::fmt::Debug for Pake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pake").field("role", &self.role).finish()
    }
}

/// The derived session key plus confirmation-tag helpers
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct PakeKey {
    session_key: [u8; 32],
}

impl PakeKey {
    /// The 32-byte session key
    pub fn session_key(&self) -> &[u8; 32] {
        &self.session_key
    }

    /// The confirmation tag this role sends to its peer
    pub fn confirm_tag(&self, role: Role) -> [u8; 32] {
        let context = match role {
            Role::Initiator => domain::PAKE_CONFIRM_INITIATOR,
            Role::Responder => domain::PAKE_CONFIRM_RESPONDER,
        };
        blake3::derive_key(context, &self.session_key)
    }

    /// Verify the peer's confirmation tag in constant time
    ///
    /// A mismatch means the codes disagreed; the error is generic on
    /// purpose and carries no information about which peer was wrong.
    pub fn verify_peer_tag(&self, tag: &[u8], peer_role: Role) -> Result<()> {
        let expected = self.confirm_tag(peer_role);
        if constant_time_equal(&expected, tag) {
            Ok(())
        } else {
            Err(CryptoError::PakeFailure)
        }
    }
}

impl std::fmt::Debug for PakeKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PakeKey<REDACTED>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> PasswordParams {
        PasswordParams::insecure_test()
    }

    #[test]
    fn test_same_code_derives_same_key() {
        let session_id = b"room-hash-123";
        let a = Pake::new(Role::Initiator, "K7N2P4QX", session_id, params()).unwrap();
        let b = Pake::new(Role::Responder, "K7N2P4QX", session_id, params()).unwrap();

        let msg_a = a.public_message();
        let msg_b = b.public_message();

        let key_a = a.finish(&msg_b).unwrap();
        let key_b = b.finish(&msg_a).unwrap();

        assert_eq!(key_a.session_key(), key_b.session_key());
    }

    #[test]
    fn test_wrong_code_detected_only_at_tag() {
        let session_id = b"room-hash-123";
        let a = Pake::new(Role::Initiator, "CODEAAAA", session_id, params()).unwrap();
        let b = Pake::new(Role::Responder, "CODEBBBB", session_id, params()).unwrap();

        let msg_a = a.public_message();
        let msg_b = b.public_message();

        // Finish succeeds on both sides - no early divergence on the wire
        let key_a = a.finish(&msg_b).unwrap();
        let key_b = b.finish(&msg_a).unwrap();
        assert_ne!(key_a.session_key(), key_b.session_key());

        // The mismatch surfaces only at tag verification, generically
        let tag_b = key_b.confirm_tag(Role::Responder);
        assert_eq!(
            key_a.verify_peer_tag(&tag_b, Role::Responder),
            Err(CryptoError::PakeFailure)
        );
    }

    #[test]
    fn test_confirmation_roundtrip() {
        let session_id = b"sid";
        let a = Pake::new(Role::Initiator, "SAMECODE", session_id, params()).unwrap();
        let b = Pake::new(Role::Responder, "SAMECODE", session_id, params()).unwrap();
        let msg_a = a.public_message();
        let msg_b = b.public_message();
        let key_a = a.finish(&msg_b).unwrap();
        let key_b = b.finish(&msg_a).unwrap();

        assert!(key_a
            .verify_peer_tag(&key_b.confirm_tag(Role::Responder), Role::Responder)
            .is_ok());
        assert!(key_b
            .verify_peer_tag(&key_a.confirm_tag(Role::Initiator), Role::Initiator)
            .is_ok());
        // Tags are direction-bound - replaying your own tag back fails
        assert!(key_a
            .verify_peer_tag(&key_a.confirm_tag(Role::Initiator), Role::Responder)
            .is_err());
    }

    #[test]
    fn test_session_id_separates_keys() {
        let a1 = Pake::new(Role::Initiator, "SAMECODE", b"session-1", params()).unwrap();
        let b1 = Pake::new(Role::Responder, "SAMECODE", b"session-1", params()).unwrap();
        let a2 = Pake::new(Role::Initiator, "SAMECODE", b"session-2", params()).unwrap();
        let b2 = Pake::new(Role::Responder, "SAMECODE", b"session-2", params()).unwrap();

        let k1 = a1.finish(&b1.public_message()).unwrap();
        let k2 = a2.finish(&b2.public_message()).unwrap();
        assert_ne!(k1.session_key(), k2.session_key());
    }

    #[test]
    fn test_invalid_public_rejected() {
        let a = Pake::new(Role::Initiator, "SAMECODE", b"sid", params()).unwrap();
        assert!(a.finish(&[0u8; 16]).is_err());
    }
}
