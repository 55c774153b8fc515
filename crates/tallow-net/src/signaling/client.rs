//! Signaling over an established channel
//!
//! Carries sealed envelopes (SDP offers/answers, ICE candidates, opaque
//! blobs) as [`Frame::Signal`] payloads. Whatever forwards these frames -
//! relay or signaling server - sees base64 ciphertext and routing ids
//! only. Inbound envelopes pass the replay guard before they are opened.

use crate::transport::PeerChannel;
use crate::{NetworkError, Result};
use tallow_protocol::signaling::{Envelope, EnvelopeKind, EnvelopeSealer, ReplayGuard};
use tallow_protocol::wire::Frame;
use tracing::warn;

/// Client side of the signaling exchange
pub struct SignalingClient {
    sealer: EnvelopeSealer,
    replay: ReplayGuard,
    local_id: String,
    peer_id: String,
}

impl SignalingClient {
    /// Bind a signaling client to a PAKE-derived key and peer ids
    pub fn new(pake_session_key: &[u8; 32], local_id: String, peer_id: String) -> Self {
        Self {
            sealer: EnvelopeSealer::new(pake_session_key),
            replay: ReplayGuard::new(),
            local_id,
            peer_id,
        }
    }

    /// Seal and send one envelope
    pub async fn send<C: PeerChannel>(
        &mut self,
        channel: &mut C,
        kind: EnvelopeKind,
        payload: &[u8],
        now_unix: u64,
    ) -> Result<()> {
        let envelope = self
            .sealer
            .seal(kind, &self.local_id, &self.peer_id, now_unix, payload)?;
        let bytes = serde_json::to_vec(&envelope)
            .map_err(|e| NetworkError::ConnectionFailed(format!("envelope encode: {}", e)))?;
        channel.send(Frame::Signal(bytes)).await
    }

    /// Receive the next envelope addressed to us
    ///
    /// Skips frames of other types and envelopes that fail the replay
    /// guard or the seal; only a closed channel ends the loop.
    pub async fn recv<C: PeerChannel>(
        &mut self,
        channel: &mut C,
        now_unix: u64,
    ) -> Result<Option<(EnvelopeKind, Vec<u8>)>> {
        loop {
            let Some(frame) = channel.recv().await? else {
                return Ok(None);
            };
            let Frame::Signal(bytes) = frame else {
                continue;
            };
            let envelope: Envelope = match serde_json::from_slice(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!("dropping undecodable envelope: {}", e);
                    continue;
                }
            };
            if envelope.to != self.local_id {
                warn!("dropping misrouted envelope for {}", envelope.to);
                continue;
            }
            if let Err(e) = self.replay.check(
                &envelope.from,
                &envelope.nonce,
                envelope.timestamp,
                now_unix,
            ) {
                warn!("dropping envelope: {}", e);
                continue;
            }
            match self.sealer.open(&envelope) {
                Ok(payload) => return Ok(Some((envelope.kind, payload))),
                Err(e) => {
                    warn!("dropping unopenable envelope: {}", e);
                    continue;
                }
            }
        }
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("local_id", &self.local_id)
            .field("peer_id", &self.peer_id)
            .finish()
    }
}
