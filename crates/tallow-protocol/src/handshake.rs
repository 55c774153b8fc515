//! The connection handshake
//!
//! Drives the four-kind handshake frame exchange over any connected
//! channel:
//!
//! ```text
//! initiator                                responder
//!   HELLO {nonce_i, suite}       ->
//!                                <-  HELLO {nonce_r, suite}
//!   PAKE_MSG {pake_i}            ->
//!                                <-  PAKE_MSG {pake_r, sealed{tag_r, hybrid_pk}}
//!   KEM_CIPHERTEXT sealed{tag_i,
//!     ratchet handshake}         ->
//!                                <-  READY sealed{ratchet reply}
//! ```
//!
//! Everything after the PAKE exchange is sealed under the PAKE-derived
//! key, so a relay or signaling server carrying these frames learns
//! nothing. The state machines here are sans-IO: they consume and produce
//! [`HandshakeFrame`]s and never touch a socket.
//!
//! Failure shape: a code mismatch surfaces at the confirmation tag with
//! the generic PAKE error; the sequence and sizes of frames up to that
//! point are identical for success and failure.

use crate::error::{ProtocolError, Result};
use crate::room::RoomCode;
use crate::wire::frames::{HandshakeFrame, HandshakeKind};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tallow_crypto::hash::{blake3, domain};
use tallow_crypto::kdf::password::PasswordParams;
use tallow_crypto::kem::hybrid::{HybridKem, HybridPublicKey, HybridSecretKey};
use tallow_crypto::pake::{Pake, PakeKey, Role};
use tallow_crypto::ratchet::{
    InitiatorHandshake, RatchetConfig, ResponderHandshake, Session,
};
use tallow_crypto::symmetric::cipher::{xchacha_open, xchacha_seal, XNONCE_LEN};
use zeroize::{Zeroize, Zeroizing};

/// Everything a completed handshake yields
#[derive(Debug)]
pub struct HandshakeOutcome {
    /// The ratcheting session for control traffic
    pub session: Session,
    /// Shared secret for per-transfer data keys (wiped on drop)
    pub transfer_secret: Zeroizing<[u8; 32]>,
    /// Channel-binding session id
    pub session_id: [u8; 32],
    /// The peer's device identity fingerprint
    pub peer_fingerprint: [u8; 32],
}

/// HELLO payload
#[derive(Serialize, Deserialize)]
struct Hello {
    nonce: [u8; 16],
}

/// Sealed tail of the responder's PAKE_MSG
#[derive(Serialize, Deserialize)]
struct ResponderReveal {
    confirm_tag: [u8; 32],
    hybrid_public: HybridPublicKey,
    fingerprint: [u8; 32],
}

/// Sealed payload of KEM_CIPHERTEXT
#[derive(Serialize, Deserialize)]
struct InitiatorReveal {
    confirm_tag: [u8; 32],
    ratchet: InitiatorHandshake,
    fingerprint: [u8; 32],
}

/// Sealed payload of READY
#[derive(Serialize, Deserialize)]
struct ReadyReveal {
    ratchet: ResponderHandshake,
}

/// The PAKE input: the room code, optionally strengthened by a shared
/// password (`code:password`)
fn pake_secret(room: &RoomCode, password: Option<&str>) -> String {
    match password {
        Some(pw) if !pw.is_empty() => format!("{}:{}", room.as_str(), pw),
        _ => room.as_str().to_string(),
    }
}

fn random_nonce16() -> [u8; 16] {
    let mut n = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut n);
    n
}

fn session_id(room_hash: &[u8; 32], nonce_i: &[u8; 16], nonce_r: &[u8; 16]) -> [u8; 32] {
    let mut input = Vec::with_capacity(64);
    input.extend_from_slice(room_hash);
    input.extend_from_slice(nonce_i);
    input.extend_from_slice(nonce_r);
    blake3::hash(&input)
}

/// Seal a handshake payload under the PAKE key
fn seal_payload(key: &PakeKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce = [0u8; XNONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let sealed = xchacha_seal(key.session_key(), &nonce, plaintext, b"tallow-handshake")?;
    let mut out = Vec::with_capacity(XNONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a handshake payload sealed under the PAKE key
fn open_payload(key: &PakeKey, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() < XNONCE_LEN {
        return Err(ProtocolError::MalformedFrame(
            "sealed handshake payload too short".into(),
        ));
    }
    let nonce: [u8; XNONCE_LEN] = payload[..XNONCE_LEN].try_into().expect("length checked");
    Ok(xchacha_open(
        key.session_key(),
        &nonce,
        &payload[XNONCE_LEN..],
        b"tallow-handshake",
    )?)
}

/// Combine the ratchet export and PAKE key into the transfer secret
fn transfer_secret(session: &Session, pake: &PakeKey) -> [u8; 32] {
    let mut input = [0u8; 64];
    input[..32].copy_from_slice(&session.export_key(b"transfer-data"));
    input[32..].copy_from_slice(pake.session_key());
    let secret = blake3::derive_key(domain::EXPORT, &input);
    input.zeroize();
    secret
}

/// What a state machine wants next
pub enum Step {
    /// Send this frame and wait for the peer
    Send(HandshakeFrame),
    /// Send this frame; the handshake is complete
    SendAndFinish(HandshakeFrame, Box<HandshakeOutcome>),
    /// Nothing to send; the handshake is complete
    Finish(Box<HandshakeOutcome>),
}

enum InitiatorState {
    AwaitHello,
    AwaitPake,
    AwaitReady,
    Done,
}

/// Initiator-side handshake driver (the peer that opened the room)
pub struct Initiator {
    state: InitiatorState,
    room: RoomCode,
    secret: String,
    params: PasswordParams,
    config: RatchetConfig,
    nonce: [u8; 16],
    fingerprint: [u8; 32],
    session_id: Option<[u8; 32]>,
    pake: Option<Pake>,
    pake_key: Option<PakeKey>,
    session: Option<Session>,
    peer_fingerprint: Option<[u8; 32]>,
}

impl Initiator {
    /// Start a handshake; returns the driver and the opening HELLO
    pub fn start(
        room: RoomCode,
        password: Option<&str>,
        fingerprint: [u8; 32],
        params: PasswordParams,
        config: RatchetConfig,
    ) -> Result<(Self, HandshakeFrame)> {
        let nonce = random_nonce16();
        let hello = HandshakeFrame::new(
            HandshakeKind::Hello,
            postcard::to_stdvec(&Hello { nonce })?,
        )?;
        Ok((
            Self {
                state: InitiatorState::AwaitHello,
                secret: pake_secret(&room, password),
                room,
                params,
                config,
                nonce,
                fingerprint,
                session_id: None,
                pake: None,
                pake_key: None,
                session: None,
                peer_fingerprint: None,
            },
            hello,
        ))
    }

    /// Feed the next frame from the peer
    pub fn handle(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        match self.state {
            InitiatorState::AwaitHello => self.on_hello(frame),
            InitiatorState::AwaitPake => self.on_pake(frame),
            InitiatorState::AwaitReady => self.on_ready(frame),
            InitiatorState::Done => Err(ProtocolError::HandshakeSequence {
                expected: "nothing",
                got: "frame after completion",
            }),
        }
    }

    fn on_hello(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::Hello, "HELLO")?;
        let hello: Hello = postcard::from_bytes(&frame.payload)?;

        let sid = session_id(&self.room.hash(), &self.nonce, &hello.nonce);
        self.session_id = Some(sid);

        let pake = Pake::new(Role::Initiator, &self.secret, &sid, self.params)?;
        let msg = pake.public_message();
        self.pake = Some(pake);
        self.state = InitiatorState::AwaitPake;

        Ok(Step::Send(HandshakeFrame::new(
            HandshakeKind::PakeMsg,
            msg.to_vec(),
        )?))
    }

    fn on_pake(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::PakeMsg, "PAKE_MSG")?;
        if frame.payload.len() < 32 {
            return Err(ProtocolError::MalformedFrame("short PAKE_MSG".into()));
        }
        let (their_public, sealed) = frame.payload.split_at(32);

        let pake = self.pake.take().ok_or(ProtocolError::HandshakeSequence {
            expected: "PAKE state",
            got: "missing",
        })?;
        let key = pake.finish(their_public)?;

        // Opening the sealed tail and checking the tag are the first and
        // only points a wrong code can surface
        let reveal_bytes = open_payload(&key, sealed)
            .map_err(|_| ProtocolError::Crypto(tallow_crypto::CryptoError::PakeFailure))?;
        let reveal: ResponderReveal = postcard::from_bytes(&reveal_bytes)?;
        key.verify_peer_tag(&reveal.confirm_tag, Role::Responder)?;
        self.peer_fingerprint = Some(reveal.fingerprint);

        let (session, ratchet_handshake) =
            Session::init_as_initiator(&reveal.hybrid_public, self.config)?;

        let inner = InitiatorReveal {
            confirm_tag: key.confirm_tag(Role::Initiator),
            ratchet: ratchet_handshake,
            fingerprint: self.fingerprint,
        };
        let sealed_reply = seal_payload(&key, &postcard::to_stdvec(&inner)?)?;

        self.session = Some(session);
        self.pake_key = Some(key);
        self.state = InitiatorState::AwaitReady;

        Ok(Step::Send(HandshakeFrame::new(
            HandshakeKind::KemCiphertext,
            sealed_reply,
        )?))
    }

    fn on_ready(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::Ready, "READY")?;
        let key = self.pake_key.take().ok_or(ProtocolError::HandshakeSequence {
            expected: "PAKE key",
            got: "missing",
        })?;
        let mut session = self.session.take().ok_or(ProtocolError::HandshakeSequence {
            expected: "session",
            got: "missing",
        })?;

        let reveal_bytes = open_payload(&key, &frame.payload)?;
        let reveal: ReadyReveal = postcard::from_bytes(&reveal_bytes)?;
        session.complete_handshake(&reveal.ratchet)?;

        let secret = transfer_secret(&session, &key);
        let sid = self.session_id.expect("session id set before READY");
        let peer_fingerprint = self
            .peer_fingerprint
            .expect("peer fingerprint set before READY");
        self.state = InitiatorState::Done;

        Ok(Step::Finish(Box::new(HandshakeOutcome {
            session,
            transfer_secret: Zeroizing::new(secret),
            session_id: sid,
            peer_fingerprint,
        })))
    }
}

enum ResponderState {
    AwaitHello,
    AwaitPakeMsg,
    AwaitKem,
    Done,
}

/// Responder-side handshake driver (the peer that joined with the code)
pub struct Responder {
    state: ResponderState,
    room: RoomCode,
    secret: String,
    params: PasswordParams,
    config: RatchetConfig,
    nonce: [u8; 16],
    fingerprint: [u8; 32],
    session_id: Option<[u8; 32]>,
    pake: Option<Pake>,
    pake_key: Option<PakeKey>,
    hybrid_secret: Option<HybridSecretKey>,
    hybrid_public: Option<HybridPublicKey>,
}

impl Responder {
    /// Create a responder ready for the initiator's HELLO
    pub fn new(
        room: RoomCode,
        password: Option<&str>,
        fingerprint: [u8; 32],
        params: PasswordParams,
        config: RatchetConfig,
    ) -> Result<Self> {
        let (hybrid_public, hybrid_secret) = HybridKem::keygen()?;
        Ok(Self {
            state: ResponderState::AwaitHello,
            secret: pake_secret(&room, password),
            room,
            params,
            config,
            nonce: random_nonce16(),
            fingerprint,
            session_id: None,
            pake: None,
            pake_key: None,
            hybrid_secret: Some(hybrid_secret),
            hybrid_public: Some(hybrid_public),
        })
    }

    /// Feed the next frame from the peer
    pub fn handle(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        match self.state {
            ResponderState::AwaitHello => self.on_hello(frame),
            ResponderState::AwaitPakeMsg => self.on_pake(frame),
            ResponderState::AwaitKem => self.on_kem(frame),
            ResponderState::Done => Err(ProtocolError::HandshakeSequence {
                expected: "nothing",
                got: "frame after completion",
            }),
        }
    }

    fn on_hello(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::Hello, "HELLO")?;
        let hello: Hello = postcard::from_bytes(&frame.payload)?;

        let sid = session_id(&self.room.hash(), &hello.nonce, &self.nonce);
        self.session_id = Some(sid);

        let pake = Pake::new(Role::Responder, &self.secret, &sid, self.params)?;
        self.pake = Some(pake);
        self.state = ResponderState::AwaitPakeMsg;

        Ok(Step::Send(HandshakeFrame::new(
            HandshakeKind::Hello,
            postcard::to_stdvec(&Hello { nonce: self.nonce })?,
        )?))
    }

    fn on_pake(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::PakeMsg, "PAKE_MSG")?;
        let pake = self.pake.take().ok_or(ProtocolError::HandshakeSequence {
            expected: "PAKE state",
            got: "missing",
        })?;

        let our_public = pake.public_message();
        let key = pake.finish(&frame.payload)?;

        let reveal = ResponderReveal {
            confirm_tag: key.confirm_tag(Role::Responder),
            hybrid_public: self
                .hybrid_public
                .take()
                .expect("hybrid public consumed once"),
            fingerprint: self.fingerprint,
        };
        let sealed = seal_payload(&key, &postcard::to_stdvec(&reveal)?)?;

        let mut payload = Vec::with_capacity(32 + sealed.len());
        payload.extend_from_slice(&our_public);
        payload.extend_from_slice(&sealed);

        self.pake_key = Some(key);
        self.state = ResponderState::AwaitKem;

        Ok(Step::Send(HandshakeFrame::new(
            HandshakeKind::PakeMsg,
            payload,
        )?))
    }

    fn on_kem(&mut self, frame: &HandshakeFrame) -> Result<Step> {
        expect_kind(frame, HandshakeKind::KemCiphertext, "KEM_CIPHERTEXT")?;
        let key = self.pake_key.take().ok_or(ProtocolError::HandshakeSequence {
            expected: "PAKE key",
            got: "missing",
        })?;

        let reveal_bytes = open_payload(&key, &frame.payload)
            .map_err(|_| ProtocolError::Crypto(tallow_crypto::CryptoError::PakeFailure))?;
        let reveal: InitiatorReveal = postcard::from_bytes(&reveal_bytes)?;
        key.verify_peer_tag(&reveal.confirm_tag, Role::Initiator)?;

        let secret_key = self
            .hybrid_secret
            .take()
            .expect("hybrid secret consumed once");
        let (session, ratchet_reply) =
            Session::init_as_responder(&secret_key, &reveal.ratchet, self.config)?;

        let ready = ReadyReveal {
            ratchet: ratchet_reply,
        };
        let sealed = seal_payload(&key, &postcard::to_stdvec(&ready)?)?;

        let secret = transfer_secret(&session, &key);
        let sid = self.session_id.expect("session id set before KEM");
        self.state = ResponderState::Done;

        Ok(Step::SendAndFinish(
            HandshakeFrame::new(HandshakeKind::Ready, sealed)?,
            Box::new(HandshakeOutcome {
                session,
                transfer_secret: Zeroizing::new(secret),
                session_id: sid,
                peer_fingerprint: reveal.fingerprint,
            }),
        ))
    }
}

fn expect_kind(
    frame: &HandshakeFrame,
    kind: HandshakeKind,
    expected: &'static str,
) -> Result<()> {
    if frame.kind != kind {
        return Err(ProtocolError::HandshakeSequence {
            expected,
            got: kind_name(frame.kind),
        });
    }
    Ok(())
}

fn kind_name(kind: HandshakeKind) -> &'static str {
    match kind {
        HandshakeKind::Hello => "HELLO",
        HandshakeKind::KemCiphertext => "KEM_CIPHERTEXT",
        HandshakeKind::PakeMsg => "PAKE_MSG",
        HandshakeKind::Ready => "READY",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(code_i: &str, code_r: &str) -> (Result<HandshakeOutcome>, Result<HandshakeOutcome>) {
        run_with_passwords(code_i, None, code_r, None)
    }

    fn run_with_passwords(
        code_i: &str,
        pw_i: Option<&str>,
        code_r: &str,
        pw_r: Option<&str>,
    ) -> (Result<HandshakeOutcome>, Result<HandshakeOutcome>) {
        let params = insecure_params();
        let config = RatchetConfig::default();
        let (mut initiator, hello) = Initiator::start(
            RoomCode::parse(code_i).unwrap(),
            pw_i,
            [0xAA; 32],
            params,
            config,
        )
        .unwrap();
        let mut responder = Responder::new(
            RoomCode::parse(code_r).unwrap(),
            pw_r,
            [0xBB; 32],
            params,
            config,
        )
        .unwrap();

        // HELLO -> HELLO
        let Step::Send(hello_r) = responder.handle(&hello).unwrap() else {
            panic!("responder should answer HELLO");
        };
        // HELLO -> PAKE_MSG
        let Step::Send(pake_i) = initiator.handle(&hello_r).unwrap() else {
            panic!("initiator should send PAKE_MSG");
        };
        // PAKE_MSG -> PAKE_MSG (responder never learns yet whether codes match)
        let Step::Send(pake_r) = responder.handle(&pake_i).unwrap() else {
            panic!("responder should answer PAKE_MSG");
        };
        // Initiator verifies here on mismatch
        let kem = match initiator.handle(&pake_r) {
            Ok(Step::Send(frame)) => frame,
            Ok(_) => panic!("initiator should send KEM_CIPHERTEXT"),
            Err(e) => return (Err(e), Err(ProtocolError::Validation("peer aborted".into()))),
        };
        let (ready, outcome_r) = match responder.handle(&kem) {
            Ok(Step::SendAndFinish(frame, outcome)) => (frame, Ok(*outcome)),
            Ok(_) => panic!("responder should finish on KEM_CIPHERTEXT"),
            Err(e) => return (Err(ProtocolError::Validation("peer aborted".into())), Err(e)),
        };
        let outcome_i = match initiator.handle(&ready) {
            Ok(Step::Finish(outcome)) => Ok(*outcome),
            Ok(_) => panic!("initiator should finish on READY"),
            Err(e) => return (Err(e), outcome_r),
        };
        (outcome_i, outcome_r)
    }

    fn insecure_params() -> PasswordParams {
        PasswordParams {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_matching_codes_complete() {
        let (i, r) = run("K7N2P4QX", "K7N2P4QX");
        let mut i = i.unwrap();
        let mut r = r.unwrap();
        assert_eq!(*i.transfer_secret, *r.transfer_secret);
        assert_eq!(i.session_id, r.session_id);
        assert_eq!(i.peer_fingerprint, [0xBB; 32]);
        assert_eq!(r.peer_fingerprint, [0xAA; 32]);

        // The resulting sessions interoperate
        let (header, ct) = i.session.encrypt(b"post-handshake", b"").unwrap();
        assert_eq!(
            r.session.decrypt(&header, &ct, b"").unwrap(),
            b"post-handshake"
        );
        let (header, ct) = r.session.encrypt(b"reply", b"").unwrap();
        assert_eq!(i.session.decrypt(&header, &ct, b"").unwrap(), b"reply");
    }

    #[test]
    fn test_mismatched_codes_fail_generically() {
        let (i, r) = run("K7N2P4QX", "K7N2P4QY");
        // The initiator detects the mismatch at the sealed tail / tag;
        // the error carries no hint about which side was wrong
        let err = i.unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::Crypto(tallow_crypto::CryptoError::PakeFailure)
        ));
        assert!(r.is_err());
    }

    #[test]
    fn test_mismatched_passwords_fail_generically() {
        let (i, r) = run_with_passwords("K7N2P4QX", Some("foo"), "K7N2P4QX", Some("bar"));
        assert!(matches!(
            i.unwrap_err(),
            ProtocolError::Crypto(tallow_crypto::CryptoError::PakeFailure)
        ));
        assert!(r.is_err());
    }

    #[test]
    fn test_matching_passwords_complete() {
        let (i, r) = run_with_passwords("K7N2P4QX", Some("hunter2"), "K7N2P4QX", Some("hunter2"));
        assert!(i.is_ok());
        assert!(r.is_ok());
    }

    #[test]
    fn test_out_of_sequence_frame_rejected() {
        let params = insecure_params();
        let config = RatchetConfig::default();
        let (mut initiator, _hello) = Initiator::start(
            RoomCode::parse("K7N2P4QX").unwrap(),
            None,
            [0u8; 32],
            params,
            config,
        )
        .unwrap();
        let bogus = HandshakeFrame::new(HandshakeKind::Ready, vec![]).unwrap();
        assert!(matches!(
            initiator.handle(&bogus),
            Err(ProtocolError::HandshakeSequence { .. })
        ));
    }
}
