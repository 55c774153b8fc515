//! Classical Diffie-Hellman component of the hybrid exchange
//!
//! Thin byte-oriented wrapper over X25519. Keys are stored as raw
//! 32-byte arrays so serde derives apply directly and zeroization covers
//! the whole secret; the dalek types exist only transiently inside
//! [`DhKeyPair::exchange`].

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// A Diffie-Hellman public key as it travels on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DhPublic([u8; 32]);

impl DhPublic {
    /// The raw key bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Wrap raw key bytes (any 32 bytes decode; X25519 has no invalid
    /// public keys, only weak ones the exchange output reveals)
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A Diffie-Hellman keypair
///
/// Only the secret is stored; the public side is recomputed on demand.
/// The secret wipes on drop.
#[derive(Clone, Serialize, Deserialize)]
pub struct DhKeyPair {
    secret: [u8; 32],
}

impl Zeroize for DhKeyPair {
    fn zeroize(&mut self) {
        self.secret.zeroize();
    }
}

impl Drop for DhKeyPair {
    fn drop(&mut self) {
        self.zeroize();
    }
}

impl DhKeyPair {
    /// Generate a fresh keypair from the OS CSPRNG
    pub fn generate() -> Self {
        let mut secret = [0u8; 32];
        OsRng.fill_bytes(&mut secret);
        Self { secret }
    }

    /// Rebuild a keypair from stored secret bytes
    pub fn from_secret_bytes(secret: [u8; 32]) -> Self {
        Self { secret }
    }

    /// The matching public key
    pub fn public(&self) -> DhPublic {
        let secret = StaticSecret::from(self.secret);
        DhPublic(*PublicKey::from(&secret).as_bytes())
    }

    /// Run the exchange against the peer's public key
    ///
    /// Both directions of a pair derive the same 32 bytes; the output
    /// wipes on drop.
    pub fn exchange(&self, peer: &DhPublic) -> Zeroizing<[u8; 32]> {
        let secret = StaticSecret::from(self.secret);
        let shared = secret.diffie_hellman(&PublicKey::from(peer.0));
        Zeroizing::new(*shared.as_bytes())
    }
}

impl std::fmt::Debug for DhKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DhKeyPair")
            .field("public", &hex_prefix(&self.public()))
            .finish()
    }
}

fn hex_prefix(public: &DhPublic) -> String {
    public.0[..4].iter().map(|b| format!("{:02x}", b)).collect()
}
