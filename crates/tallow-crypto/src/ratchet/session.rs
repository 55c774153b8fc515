//! The ratcheting session
//!
//! Each direction is an independent sender-driven ratchet. A direction is
//! a sequence of chains; every chain starts from a step secret - either a
//! fresh DH against the receiver's session-static key, or an ML-KEM
//! encapsulation to the receiver's advertised key - mixed into the
//! per-direction root. Message keys advance along the chain one per
//! message and are used exactly once.
//!
//! Step material is repeated in every header of its chain, so losing the
//! first message of a chain never strands the receiver; only losing an
//! entire chain (all of its messages) is unrecoverable and surfaces as a
//! desync error.

use crate::error::{CryptoError, Result};
use crate::hash::{blake3, domain};
use crate::kem::dh::{DhKeyPair, DhPublic};
use crate::kem::hybrid::{HybridCiphertext, HybridKem, HybridPublicKey, HybridSecretKey};
use crate::kem::mlkem::{self, MlKem};
use crate::ratchet::skipped::SkippedKeys;
use crate::symmetric::cipher::Cipher;
use crate::symmetric::nonce::{compose, Direction};
use crate::symmetric::CipherSuite;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

/// Hard cap on authentication failures before the session aborts
const AUTH_FAILURE_ABORT: u32 = 10;

/// How many generations of our own decapsulation keys we retain
const PQ_KEY_RETENTION: usize = 2;

/// Direction label for initiator-to-responder traffic
const LABEL_I2R: &[u8] = b"tallow-dir-i2r";

/// Direction label for responder-to-initiator traffic
const LABEL_R2I: &[u8] = b"tallow-dir-r2i";

/// Ratchet cadence and cache configuration
///
/// The intervals are minimum cadences: the DH ephemeral rotates at least
/// every `dh_interval` messages and the ML-KEM re-key fires at least every
/// `pq_interval` messages. Both can also be forced explicitly through
/// [`Session::trigger_dh_ratchet`] and [`Session::trigger_pq_ratchet`].
#[derive(Debug, Clone, Copy)]
pub struct RatchetConfig {
    /// Messages between DH ephemeral rotations
    pub dh_interval: u64,
    /// Messages between ML-KEM re-keys
    pub pq_interval: u64,
    /// Skipped-message-key cache capacity
    pub max_skipped: usize,
    /// AEAD suite for message sealing
    pub suite: CipherSuite,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            dh_interval: 1000,
            pq_interval: 100,
            max_skipped: 2000,
            suite: CipherSuite::default(),
        }
    }
}

/// An advertised ML-KEM encapsulation key with its generation number
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PqAdvert {
    /// Monotonic generation of the advertised key
    pub gen: u64,
    /// Raw ML-KEM-768 encapsulation key bytes
    pub encaps_key: Vec<u8>,
}

/// Message header carried alongside each ciphertext
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    /// Chain index within the sender's direction (monotonic)
    pub chain_id: u64,
    /// Message counter within the chain
    pub counter: u64,
    /// Length of the sender's previous chain (for skipped-key capture)
    pub prev_chain_len: u64,
    /// Sender's current DH ephemeral public key
    pub dh_public: [u8; 32],
    /// ML-KEM ciphertext when this chain was started by a PQ step
    pub pq_ciphertext: Option<Vec<u8>>,
    /// Generation of the receiver's decapsulation key the PQ step used
    pub pq_gen: Option<u64>,
    /// Sender's current decapsulation-key advertisement for the reverse
    /// direction
    pub pq_advert: Option<PqAdvert>,
}

/// First handshake message: initiator to responder
#[derive(Clone, Serialize, Deserialize)]
pub struct InitiatorHandshake {
    /// Hybrid KEM ciphertext establishing the session secret
    pub kem_ciphertext: HybridCiphertext,
    /// Initiator's session-static DH public (receive-side key)
    pub dh_static_public: [u8; 32],
    /// Initiator's generation-0 ML-KEM advertisement
    pub pq_advert: PqAdvert,
}

/// Second handshake message: responder to initiator
#[derive(Clone, Serialize, Deserialize)]
pub struct ResponderHandshake {
    /// Responder's generation-0 ML-KEM advertisement
    pub pq_advert: PqAdvert,
}

/// Sending-direction ratchet state
struct SendState {
    root: [u8; 32],
    chain_key: [u8; 32],
    chain_id: u64,
    next: u64,
    prev_chain_len: u64,
    peer_static: DhPublic,
    eph: DhKeyPair,
    eph_public: [u8; 32],
    pq_ciphertext: Option<Vec<u8>>,
    pq_gen: Option<u64>,
    peer_pq: Option<(u64, mlkem::PublicKey)>,
    since_dh: u64,
    since_pq: u64,
    force_dh: bool,
    force_pq: bool,
}

impl Zeroize for SendState {
    fn zeroize(&mut self) {
        self.root.zeroize();
        self.chain_key.zeroize();
        if let Some(ct) = &mut self.pq_ciphertext {
            ct.zeroize();
        }
    }
}

/// Receiving-direction ratchet state
struct RecvState {
    root: [u8; 32],
    chain_key: [u8; 32],
    /// None until the first header of chain 0 arrives
    chain_id: Option<u64>,
    next: u64,
    static_kp: DhKeyPair,
}

impl Zeroize for RecvState {
    fn zeroize(&mut self) {
        self.root.zeroize();
        self.chain_key.zeroize();
    }
}

/// A live ratcheting session
///
/// All chain, root, and message keys are wiped on drop; expired skipped
/// keys are wiped on eviction.
pub struct Session {
    config: RatchetConfig,
    send: SendState,
    recv: RecvState,
    send_label: &'static [u8],
    recv_label: &'static [u8],
    send_direction: Direction,
    recv_direction: Direction,
    skipped: SkippedKeys,
    /// Our decapsulation keys by generation, newest last
    pq_keys: Vec<(u64, mlkem::SecretKey)>,
    /// Our current advertisement, repeated in every outgoing header
    pq_advert: PqAdvert,
    /// Stable secret for application-layer key export
    export_secret: [u8; 32],
    auth_failures: u32,
    aborted: bool,
}

/// Advance a root with a step secret and derive the first chain key
fn step_chain(root: &mut [u8; 32], step_secret: &[u8; 32], label: &[u8]) -> [u8; 32] {
    let mut ikm = [0u8; 64];
    ikm[..32].copy_from_slice(root);
    ikm[32..].copy_from_slice(step_secret);
    *root = blake3::derive_key(domain::ROOT_KEY, &ikm);
    ikm.zeroize();

    let mut chain_ikm = Vec::with_capacity(32 + label.len());
    chain_ikm.extend_from_slice(root);
    chain_ikm.extend_from_slice(label);
    let ck = blake3::derive_key(domain::CHAIN_KEY, &chain_ikm);
    chain_ikm.zeroize();
    ck
}

/// Derive the message key at the head of a chain and advance the chain
fn next_message_key(chain_key: &mut [u8; 32]) -> [u8; 32] {
    let mk = blake3::derive_key(domain::MESSAGE_KEY, chain_key);
    *chain_key = blake3::derive_key(domain::CHAIN_KEY, chain_key);
    mk
}

impl Session {
    /// Initialize as the peer that encapsulates to the other's hybrid key
    ///
    /// Returns the session and the handshake message to deliver to the
    /// responder. The handshake must be answered with a
    /// [`ResponderHandshake`] via [`Session::complete_handshake`] before
    /// the first PQ re-key can fire; encryption works immediately.
    pub fn init_as_initiator(
        peer_public: &HybridPublicKey,
        config: RatchetConfig,
    ) -> Result<(Self, InitiatorHandshake)> {
        let (kem_ciphertext, shared) = HybridKem::encapsulate(peer_public)?;

        let static_kp = DhKeyPair::generate();
        let dh_static_public = *static_kp.public().as_bytes();

        let (pq_pk, pq_sk) = MlKem::keygen()?;
        let pq_advert = PqAdvert {
            gen: 0,
            encaps_key: pq_pk.as_bytes().to_vec(),
        };

        let session = Self::build(
            &shared.0,
            true,
            peer_public.dh,
            static_kp,
            pq_sk,
            pq_advert.clone(),
            config,
        );

        let handshake = InitiatorHandshake {
            kem_ciphertext,
            dh_static_public,
            pq_advert,
        };

        Ok((session, handshake))
    }

    /// Initialize as the peer whose hybrid key was encapsulated to
    ///
    /// `our_secret` decapsulates the handshake ciphertext; the initiator's
    /// DH static arrives in the handshake itself.
    pub fn init_as_responder(
        our_secret: &HybridSecretKey,
        their_handshake: &InitiatorHandshake,
        config: RatchetConfig,
    ) -> Result<(Self, ResponderHandshake)> {
        let shared = HybridKem::decapsulate(our_secret, &their_handshake.kem_ciphertext)?;

        let (pq_pk, pq_sk) = MlKem::keygen()?;
        let pq_advert = PqAdvert {
            gen: 0,
            encaps_key: pq_pk.as_bytes().to_vec(),
        };

        let mut session = Self::build(
            &shared.0,
            false,
            DhPublic::from_bytes(their_handshake.dh_static_public),
            our_secret.dh.clone(),
            pq_sk,
            pq_advert.clone(),
            config,
        );

        session.install_peer_advert(&their_handshake.pq_advert)?;

        Ok((session, ResponderHandshake { pq_advert }))
    }

    /// Install the responder's handshake on the initiator side
    pub fn complete_handshake(&mut self, their_handshake: &ResponderHandshake) -> Result<()> {
        self.install_peer_advert(&their_handshake.pq_advert)
    }

    /// Derive an application key bound to this session's initial secret
    ///
    /// Used by the transfer layer for its chunk data key. The export
    /// secret never changes over the session's lifetime, so both peers
    /// derive identical keys for identical `info`.
    pub fn export_key(&self, info: &[u8]) -> [u8; 32] {
        blake3::keyed_hash(&self.export_secret, info)
    }

    fn build(
        shared: &[u8; 32],
        is_initiator: bool,
        peer_static: DhPublic,
        static_kp: DhKeyPair,
        pq_sk: mlkem::SecretKey,
        pq_advert: PqAdvert,
        config: RatchetConfig,
    ) -> Self {
        let (send_label, recv_label) = if is_initiator {
            (LABEL_I2R, LABEL_R2I)
        } else {
            (LABEL_R2I, LABEL_I2R)
        };
        let (send_direction, recv_direction) = if is_initiator {
            (Direction::Send, Direction::Receive)
        } else {
            (Direction::Receive, Direction::Send)
        };

        let root_for = |label: &[u8]| {
            let mut ikm = Vec::with_capacity(32 + label.len());
            ikm.extend_from_slice(shared);
            ikm.extend_from_slice(label);
            let root = blake3::derive_key(domain::ROOT_KEY, &ikm);
            ikm.zeroize();
            root
        };

        // Chain 0 of our send direction starts with a DH step against the
        // peer's session-static key; the ephemeral public rides in every
        // header so the receiver can mirror the step.
        let mut send_root = root_for(send_label);
        let eph = DhKeyPair::generate();
        let eph_public = *eph.public().as_bytes();
        let dh_ss = eph.exchange(&peer_static);
        let send_chain = step_chain(&mut send_root, &dh_ss, send_label);
        drop(dh_ss);

        let send = SendState {
            root: send_root,
            chain_key: send_chain,
            chain_id: 0,
            next: 0,
            prev_chain_len: 0,
            peer_static,
            eph,
            eph_public,
            pq_ciphertext: None,
            pq_gen: None,
            peer_pq: None,
            since_dh: 0,
            since_pq: 0,
            force_dh: false,
            force_pq: false,
        };

        let recv = RecvState {
            root: root_for(recv_label),
            chain_key: [0u8; 32],
            chain_id: None,
            next: 0,
            static_kp,
        };

        let export_secret = blake3::derive_key(domain::EXPORT, shared);

        Self {
            config,
            send,
            recv,
            send_label,
            recv_label,
            send_direction,
            recv_direction,
            skipped: SkippedKeys::new(config.max_skipped),
            pq_keys: vec![(0, pq_sk)],
            pq_advert,
            export_secret,
            auth_failures: 0,
            aborted: false,
        }
    }

    fn install_peer_advert(&mut self, advert: &PqAdvert) -> Result<()> {
        let key = mlkem::PublicKey::from_bytes(advert.encaps_key.clone())?;
        match &self.send.peer_pq {
            Some((gen, _)) if *gen >= advert.gen => {}
            _ => self.send.peer_pq = Some((advert.gen, key)),
        }
        Ok(())
    }

    /// Force a DH ephemeral rotation on the next encrypted message
    pub fn trigger_dh_ratchet(&mut self) {
        self.send.force_dh = true;
    }

    /// Force an ML-KEM re-key on the next encrypted message
    pub fn trigger_pq_ratchet(&mut self) {
        self.send.force_pq = true;
    }

    /// Authentication failures recorded so far
    pub fn auth_failures(&self) -> u32 {
        self.auth_failures
    }

    /// True once the session refused further traffic
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Encrypt a message, advancing the send chain
    pub fn encrypt(&mut self, plaintext: &[u8], aad: &[u8]) -> Result<(Header, Vec<u8>)> {
        if self.aborted {
            return Err(CryptoError::SessionAborted);
        }

        self.maybe_step()?;

        let mk = Zeroizing::new(next_message_key(&mut self.send.chain_key));
        let counter = self.send.next;
        self.send.next += 1;
        self.send.since_dh += 1;
        self.send.since_pq += 1;

        let header = Header {
            chain_id: self.send.chain_id,
            counter,
            prev_chain_len: self.send.prev_chain_len,
            dh_public: self.send.eph_public,
            pq_ciphertext: self.send.pq_ciphertext.clone(),
            pq_gen: self.send.pq_gen,
            pq_advert: Some(self.pq_advert.clone()),
        };

        let cipher = Cipher::new(self.config.suite, &mk);
        let nonce = compose(self.send_direction, counter);
        let ciphertext = cipher.seal(&nonce, plaintext, aad)?;

        Ok((header, ciphertext))
    }

    /// Perform a pending cadence or forced ratchet step before sending
    fn maybe_step(&mut self) -> Result<()> {
        let pq_due = self.send.force_pq || self.send.since_pq >= self.config.pq_interval;
        let dh_due = self.send.force_dh || self.send.since_dh >= self.config.dh_interval;

        if pq_due && self.send.peer_pq.is_some() {
            self.pq_step()?;
        } else if dh_due {
            self.dh_step();
        }
        Ok(())
    }

    fn pq_step(&mut self) -> Result<()> {
        let (gen, key) = self
            .send
            .peer_pq
            .as_ref()
            .expect("pq_step requires a peer advert");
        let (ct, ss) = MlKem::encapsulate(key)?;

        self.send.prev_chain_len = self.send.next;
        self.send.chain_id += 1;
        self.send.next = 0;
        self.send.chain_key = step_chain(&mut self.send.root, &ss.0, self.send_label);
        self.send.pq_ciphertext = Some(ct.as_bytes().to_vec());
        self.send.pq_gen = Some(*gen);
        self.send.since_pq = 0;
        self.send.force_pq = false;
        Ok(())
    }

    fn dh_step(&mut self) {
        self.send.eph = DhKeyPair::generate();
        self.send.eph_public = *self.send.eph.public().as_bytes();
        let ss = self.send.eph.exchange(&self.send.peer_static);

        self.send.prev_chain_len = self.send.next;
        self.send.chain_id += 1;
        self.send.next = 0;
        self.send.chain_key = step_chain(&mut self.send.root, &ss, self.send_label);
        self.send.pq_ciphertext = None;
        self.send.pq_gen = None;
        self.send.since_dh = 0;
        self.send.force_dh = false;
    }

    /// Decrypt a message, handling out-of-order delivery via the
    /// skipped-key cache
    ///
    /// Failure semantics: a counter behind the cache window is
    /// [`CryptoError::StaleHeader`] - drop the message, do not retry. A
    /// tag mismatch counts toward the abort threshold; at ten failures
    /// the session refuses all further traffic.
    pub fn decrypt(&mut self, header: &Header, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if self.aborted {
            return Err(CryptoError::SessionAborted);
        }

        if let Some(advert) = &header.pq_advert {
            self.install_peer_advert(advert)?;
        }

        let mk = Zeroizing::new(self.message_key_for(header)?);

        let cipher = Cipher::new(self.config.suite, &mk);
        let nonce = compose(self.recv_direction, header.counter);
        match cipher.open(&nonce, ciphertext, aad) {
            Ok(plaintext) => Ok(plaintext),
            Err(CryptoError::TagMismatch) => {
                // Re-park the key: a forged frame must not burn the slot
                // for the genuine retransmission of this counter.
                self.skipped.insert(header.chain_id, header.counter, *mk);
                self.auth_failures += 1;
                if self.auth_failures >= AUTH_FAILURE_ABORT {
                    self.aborted = true;
                }
                Err(CryptoError::TagMismatch)
            }
            Err(e) => Err(e),
        }
    }

    /// Locate or derive the message key a header refers to
    fn message_key_for(&mut self, header: &Header) -> Result<[u8; 32]> {
        match self.recv.chain_id {
            None => {
                if header.chain_id != 0 {
                    return Err(CryptoError::Desync(format!(
                        "first header must open chain 0, got chain {}",
                        header.chain_id
                    )));
                }
                self.step_recv_chain(header)?;
            }
            Some(current) if header.chain_id == current => {}
            Some(current) if header.chain_id == current + 1 => {
                // Park the unconsumed keys of the closing chain
                self.capture_skipped(current, header.prev_chain_len)?;
                self.step_recv_chain(header)?;
            }
            Some(current) if header.chain_id > current => {
                // A whole chain was lost including its step material
                return Err(CryptoError::Desync(format!(
                    "chain gap: at {}, header for {}",
                    current, header.chain_id
                )));
            }
            Some(_) => {
                // Message from an already-closed chain
                return self
                    .skipped
                    .take(header.chain_id, header.counter)
                    .ok_or(CryptoError::StaleHeader {
                        counter: header.counter,
                        floor: 0,
                    });
            }
        }

        // Within the current chain
        if header.counter < self.recv.next {
            return self
                .skipped
                .take(header.chain_id, header.counter)
                .ok_or(CryptoError::StaleHeader {
                    counter: header.counter,
                    floor: self.recv.next,
                });
        }

        let gap = header.counter - self.recv.next;
        if gap as usize > self.config.max_skipped {
            return Err(CryptoError::Desync(format!(
                "skip of {} exceeds cache capacity {}",
                gap, self.config.max_skipped
            )));
        }

        let chain_id = header.chain_id;
        while self.recv.next < header.counter {
            let mk = next_message_key(&mut self.recv.chain_key);
            self.skipped.insert(chain_id, self.recv.next, mk);
            self.recv.next += 1;
        }

        let mk = next_message_key(&mut self.recv.chain_key);
        self.recv.next += 1;
        Ok(mk)
    }

    /// Derive and park the remaining keys of the chain being closed
    fn capture_skipped(&mut self, chain_id: u64, chain_len: u64) -> Result<()> {
        if chain_len < self.recv.next {
            return Err(CryptoError::Desync(format!(
                "previous chain length {} below consumed counter {}",
                chain_len, self.recv.next
            )));
        }
        let gap = chain_len - self.recv.next;
        if gap as usize > self.config.max_skipped {
            return Err(CryptoError::Desync(format!(
                "closing-chain skip of {} exceeds cache capacity {}",
                gap, self.config.max_skipped
            )));
        }
        while self.recv.next < chain_len {
            let mk = next_message_key(&mut self.recv.chain_key);
            self.skipped.insert(chain_id, self.recv.next, mk);
            self.recv.next += 1;
        }
        Ok(())
    }

    /// Open the chain a header belongs to by mirroring its step
    fn step_recv_chain(&mut self, header: &Header) -> Result<()> {
        let step_secret: Zeroizing<[u8; 32]> = match (&header.pq_ciphertext, header.pq_gen) {
            (Some(ct_bytes), Some(gen)) => {
                let ct = mlkem::Ciphertext::from_bytes(ct_bytes.clone())?;
                let sk = self
                    .pq_keys
                    .iter()
                    .find(|(g, _)| *g == gen)
                    .map(|(_, sk)| sk)
                    .ok_or_else(|| {
                        CryptoError::Desync(format!("unknown pq key generation {}", gen))
                    })?;
                let ss = MlKem::decapsulate(sk, &ct)?;
                let secret = Zeroizing::new(ss.0);

                // The peer consumed our newest key: rotate the advertisement
                if gen == self.pq_advert.gen {
                    self.rotate_pq_advert()?;
                }
                secret
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(CryptoError::Desync(
                    "pq ciphertext and generation must travel together".into(),
                ));
            }
            (None, None) => {
                let remote = DhPublic::from_bytes(header.dh_public);
                self.recv.static_kp.exchange(&remote)
            }
        };

        self.recv.chain_key = step_chain(&mut self.recv.root, &step_secret, self.recv_label);
        self.recv.chain_id = Some(header.chain_id);
        self.recv.next = 0;
        Ok(())
    }

    /// Generate the next decapsulation-key generation and retire the oldest
    fn rotate_pq_advert(&mut self) -> Result<()> {
        let next_gen = self.pq_advert.gen + 1;
        let (pk, sk) = MlKem::keygen()?;
        self.pq_keys.push((next_gen, sk));
        while self.pq_keys.len() > PQ_KEY_RETENTION {
            self.pq_keys.remove(0);
        }
        self.pq_advert = PqAdvert {
            gen: next_gen,
            encaps_key: pk.as_bytes().to_vec(),
        };
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.send.zeroize();
        self.recv.zeroize();
        self.export_secret.zeroize();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("send_chain", &self.send.chain_id)
            .field("recv_chain", &self.recv.chain_id)
            .field("auth_failures", &self.auth_failures)
            .field("aborted", &self.aborted)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(config: RatchetConfig) -> (Session, Session) {
        let (pk, sk) = HybridKem::keygen().unwrap();
        let (mut alice, hs) = Session::init_as_initiator(&pk, config).unwrap();
        let (bob, resp) = Session::init_as_responder(&sk, &hs, config).unwrap();
        alice.complete_handshake(&resp).unwrap();
        (alice, bob)
    }

    #[test]
    fn test_roundtrip_in_order() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        for i in 0..20u32 {
            let msg = format!("message {}", i);
            let (header, ct) = alice.encrypt(msg.as_bytes(), b"aad").unwrap();
            let pt = bob.decrypt(&header, &ct, b"aad").unwrap();
            assert_eq!(pt, msg.as_bytes());
        }
    }

    #[test]
    fn test_bidirectional() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let (h1, c1) = alice.encrypt(b"ping", b"").unwrap();
        assert_eq!(bob.decrypt(&h1, &c1, b"").unwrap(), b"ping");
        let (h2, c2) = bob.encrypt(b"pong", b"").unwrap();
        assert_eq!(alice.decrypt(&h2, &c2, b"").unwrap(), b"pong");
    }

    #[test]
    fn test_out_of_order_via_skipped_cache() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let batches: Vec<_> = (0..5u32)
            .map(|i| alice.encrypt(format!("m{}", i).as_bytes(), b"").unwrap())
            .collect();

        // Deliver 4, 2, 0, 1, 3
        for &i in &[4usize, 2, 0, 1, 3] {
            let (header, ct) = &batches[i];
            let pt = bob.decrypt(header, ct, b"").unwrap();
            assert_eq!(pt, format!("m{}", i).as_bytes());
        }
    }

    #[test]
    fn test_replay_is_stale() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let (header, ct) = alice.encrypt(b"once", b"").unwrap();
        bob.decrypt(&header, &ct, b"").unwrap();
        // Same message again: key was consumed and wiped
        assert!(matches!(
            bob.decrypt(&header, &ct, b""),
            Err(CryptoError::StaleHeader { .. })
        ));
    }

    #[test]
    fn test_dh_cadence_rotates_chain() {
        let config = RatchetConfig {
            dh_interval: 4,
            pq_interval: 1_000_000,
            ..Default::default()
        };
        let (mut alice, mut bob) = pair(config);
        let mut chain_ids = Vec::new();
        for i in 0..10u32 {
            let (header, ct) = alice.encrypt(format!("m{}", i).as_bytes(), b"").unwrap();
            chain_ids.push(header.chain_id);
            bob.decrypt(&header, &ct, b"").unwrap();
        }
        assert!(
            *chain_ids.last().unwrap() >= 2,
            "expected at least two rotations, saw {:?}",
            chain_ids
        );
    }

    #[test]
    fn test_pq_cadence_rekeys() {
        let config = RatchetConfig {
            dh_interval: 1_000_000,
            pq_interval: 3,
            ..Default::default()
        };
        let (mut alice, mut bob) = pair(config);
        let mut saw_pq = false;
        for i in 0..8u32 {
            let (header, ct) = alice.encrypt(format!("m{}", i).as_bytes(), b"").unwrap();
            saw_pq |= header.pq_ciphertext.is_some();
            bob.decrypt(&header, &ct, b"").unwrap();
        }
        assert!(saw_pq, "pq re-key never fired");
    }

    #[test]
    fn test_explicit_triggers() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let (h0, c0) = alice.encrypt(b"a", b"").unwrap();
        bob.decrypt(&h0, &c0, b"").unwrap();

        alice.trigger_dh_ratchet();
        let (h1, c1) = alice.encrypt(b"b", b"").unwrap();
        assert_eq!(h1.chain_id, h0.chain_id + 1);
        assert!(h1.pq_ciphertext.is_none());
        bob.decrypt(&h1, &c1, b"").unwrap();

        alice.trigger_pq_ratchet();
        let (h2, c2) = alice.encrypt(b"c", b"").unwrap();
        assert_eq!(h2.chain_id, h1.chain_id + 1);
        assert!(h2.pq_ciphertext.is_some());
        bob.decrypt(&h2, &c2, b"").unwrap();
    }

    #[test]
    fn test_step_material_repeats_within_chain() {
        // Losing the first message of a chain must not strand the receiver
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let (h0, c0) = alice.encrypt(b"seen", b"").unwrap();
        bob.decrypt(&h0, &c0, b"").unwrap();

        alice.trigger_pq_ratchet();
        let (_h_lost, _c_lost) = alice.encrypt(b"lost", b"").unwrap();
        let (h2, c2) = alice.encrypt(b"arrives", b"").unwrap();
        assert!(h2.pq_ciphertext.is_some());
        assert_eq!(bob.decrypt(&h2, &c2, b"").unwrap(), b"arrives");
    }

    #[test]
    fn test_tampering_counts_toward_abort() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        for _ in 0..10 {
            let (header, mut ct) = alice.encrypt(b"payload", b"").unwrap();
            ct[0] ^= 1;
            assert_eq!(
                bob.decrypt(&header, &ct, b""),
                Err(CryptoError::TagMismatch)
            );
        }
        assert!(bob.is_aborted());
        let (header, ct) = alice.encrypt(b"after", b"").unwrap();
        assert_eq!(
            bob.decrypt(&header, &ct, b""),
            Err(CryptoError::SessionAborted)
        );
    }

    #[test]
    fn test_export_keys_agree() {
        let (alice, bob) = pair(RatchetConfig::default());
        assert_eq!(
            alice.export_key(b"transfer-data"),
            bob.export_key(b"transfer-data")
        );
        assert_ne!(
            alice.export_key(b"transfer-data"),
            alice.export_key(b"other-context")
        );
    }

    #[test]
    fn test_wrong_aad_fails() {
        let (mut alice, mut bob) = pair(RatchetConfig::default());
        let (header, ct) = alice.encrypt(b"bound", b"chunk-7").unwrap();
        assert_eq!(
            bob.decrypt(&header, &ct, b"chunk-8"),
            Err(CryptoError::TagMismatch)
        );
    }
}
