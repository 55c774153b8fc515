//! The signaling message envelope
//!
//! JSON over the signaling WebSocket:
//!
//! ```json
//! { "type", "from", "to", "timestamp", "nonce", "ciphertext", "mac" }
//! ```
//!
//! `nonce` (24 bytes), `ciphertext`, and `mac` are base64. The body is
//! XChaCha20-Poly1305 under the PAKE-derived signaling key with the
//! routing fields as AAD, and the MAC covers the full routing header so
//! the server cannot splice envelopes between rooms even blindly.

use crate::error::{ProtocolError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tallow_crypto::hash::{blake3, domain};
use tallow_crypto::mem::constant_time_equal;
use tallow_crypto::symmetric::cipher::{xchacha_open, xchacha_seal, XNONCE_LEN};

/// Envelope payload kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    /// SDP offer
    Offer,
    /// SDP answer
    Answer,
    /// Trickled ICE candidate
    IceCandidate,
    /// PAKE public message
    PakeMsg,
    /// Opaque application payload
    Blob,
}

/// One signaling envelope as it travels over the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Payload kind
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    /// Sender peer id
    pub from: String,
    /// Recipient peer id
    pub to: String,
    /// Unix seconds at sealing time
    pub timestamp: u64,
    /// Base64 of the 24-byte random nonce
    pub nonce: String,
    /// Base64 of the sealed body
    pub ciphertext: String,
    /// Base64 of the routing MAC
    pub mac: String,
}

/// Seals and opens envelopes under a session's signaling keys
pub struct EnvelopeSealer {
    enc_key: [u8; 32],
    mac_key: [u8; 32],
}

/// AAD binds the routing fields to the sealed body
fn routing_aad(kind: EnvelopeKind, from: &str, to: &str, timestamp: u64) -> Vec<u8> {
    let mut aad = Vec::with_capacity(from.len() + to.len() + 16);
    aad.push(kind as u8);
    aad.push(0);
    aad.extend_from_slice(from.as_bytes());
    aad.push(0);
    aad.extend_from_slice(to.as_bytes());
    aad.push(0);
    aad.extend_from_slice(&timestamp.to_be_bytes());
    aad
}

impl EnvelopeSealer {
    /// Derive the signaling keys from the PAKE session key
    pub fn new(pake_session_key: &[u8; 32]) -> Self {
        let enc_key = blake3::derive_key(domain::SIGNALING_V1, pake_session_key);
        let mac_key = blake3::derive_key(domain::SIGNALING_V1, &enc_key);
        Self { enc_key, mac_key }
    }

    /// Seal a plaintext into an envelope
    pub fn seal(
        &self,
        kind: EnvelopeKind,
        from: &str,
        to: &str,
        timestamp: u64,
        plaintext: &[u8],
    ) -> Result<Envelope> {
        let mut nonce = [0u8; XNONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce);

        let aad = routing_aad(kind, from, to, timestamp);
        let sealed = xchacha_seal(&self.enc_key, &nonce, plaintext, &aad)?;

        let mut mac_input = aad;
        mac_input.extend_from_slice(&nonce);
        mac_input.extend_from_slice(&sealed);
        let mac = blake3::keyed_hash(&self.mac_key, &mac_input);

        Ok(Envelope {
            kind,
            from: from.to_string(),
            to: to.to_string(),
            timestamp,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(&sealed),
            mac: BASE64.encode(mac),
        })
    }

    /// Verify and open an envelope
    pub fn open(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let nonce_bytes = BASE64
            .decode(&envelope.nonce)
            .map_err(|e| ProtocolError::EnvelopeRejected(format!("bad nonce encoding: {}", e)))?;
        let nonce: [u8; XNONCE_LEN] = nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::EnvelopeRejected("nonce must be 24 bytes".into()))?;
        let sealed = BASE64
            .decode(&envelope.ciphertext)
            .map_err(|e| ProtocolError::EnvelopeRejected(format!("bad body encoding: {}", e)))?;
        let mac = BASE64
            .decode(&envelope.mac)
            .map_err(|e| ProtocolError::EnvelopeRejected(format!("bad mac encoding: {}", e)))?;

        let aad = routing_aad(envelope.kind, &envelope.from, &envelope.to, envelope.timestamp);

        let mut mac_input = aad.clone();
        mac_input.extend_from_slice(&nonce);
        mac_input.extend_from_slice(&sealed);
        let expected = blake3::keyed_hash(&self.mac_key, &mac_input);
        if !constant_time_equal(&expected, &mac) {
            return Err(ProtocolError::EnvelopeRejected("mac mismatch".into()));
        }

        Ok(xchacha_open(&self.enc_key, &nonce, &sealed, &aad)?)
    }
}

impl std::fmt::Debug for EnvelopeSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EnvelopeSealer<REDACTED>")
    }
}
