//! Session establishment shared by send and receive
//!
//! Builds the peer channel through the transport selector - QUIC to a
//! LAN-discovered sender, then a hole-punched datagram path, then the
//! TLS relay as the terminal stage - runs the handshake over whichever
//! path won, and provides the sealed-control helpers the transfer
//! drivers use. The sender side mirrors the chain by listening on every
//! path at once and taking the first that connects.

use super::CliError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tallow_crypto::hash::blake3;
use tallow_crypto::kdf::password::PasswordParams;
use tallow_crypto::ratchet::{Header, RatchetConfig, Session};
use tallow_crypto::symmetric::cipher::{xchacha_open, xchacha_seal, XNONCE_LEN};
use tallow_net::discovery::{self, Advertisement, LanAdvertiser, SenderContact};
use tallow_net::nat::candidates::{gather_candidates, validate_candidate_addr, CandidateKind};
use tallow_net::nat::classify::{Classification, NatClass};
use tallow_net::nat::Strategy;
use tallow_net::transport::fallback::{
    connect_with_fallback, DatagramPlan, FallbackPlan, QuicPlan, RelayPlan,
};
use tallow_net::transport::relay_tcp::{RelayChannel, RelayRole, RelayTrust};
use tallow_net::transport::{datagram, quic, Channel, PeerChannel, IDLE_TIMEOUT};
use tallow_protocol::handshake::{HandshakeOutcome, Initiator, Responder, Step};
use tallow_protocol::room::RoomCode;
use tallow_protocol::wire::{ControlFrame, Frame};
use tallow_store::config::Config;
use tallow_store::identity::Identity;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// AAD label for sealed control frames
const CONTROL_AAD: &[u8] = b"tallow-control";

/// How long the receiver looks for the sender on the LAN
const DISCOVER_TIMEOUT: Duration = Duration::from_millis(800);

/// Budget for retrying the relay join while the creator binds its room
const JOIN_RETRY_BUDGET: Duration = Duration::from_secs(10);

/// An established, authenticated peer session
pub struct Established {
    /// The connected channel
    pub channel: Channel,
    /// Handshake outputs (ratchet session, transfer secret, peer identity)
    pub outcome: HandshakeOutcome,
}

/// Classify the local NAT; the result drives the transport selector
///
/// With no responsive STUN server the class degrades to Blocked and the
/// selector goes straight to the relay, per the strategy matrix.
pub async fn probe_nat(config: &Config) -> Option<Classification> {
    let socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("could not bind for NAT probe: {}", e);
            return None;
        }
    };
    match tallow_net::nat::classify::classify(&socket, &config.stun_servers).await {
        Ok(result) => {
            info!(class = ?result.class, mapped = ?result.mapped, "nat classified");
            Some(result)
        }
        Err(e) => {
            warn!("nat classification failed: {}", e);
            None
        }
    }
}

/// Punch token shared by both peers of a room
fn punch_token(room_hash: &[u8; 32]) -> [u8; 16] {
    let mut input = Vec::with_capacity(32 + 12);
    input.extend_from_slice(room_hash);
    input.extend_from_slice(b"tallow-punch");
    let digest = blake3::hash(&input);
    digest[..16].try_into().expect("16 of 32")
}

/// Best-effort host name for the LAN advertisement
fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "tallow".to_string())
}

/// The sender's direct-path listeners plus their LAN advertisement
struct SenderListeners {
    quic: Option<quic::QuicListener>,
    punch_socket: Option<Arc<UdpSocket>>,
    _advertiser: Option<LanAdvertiser>,
}

/// Stand up the sender's direct-path listeners and advertise them
///
/// Privacy mode stands up nothing: no listeners, no advertisement, no
/// address exposure - the relay is the only path.
async fn open_sender_listeners(
    config: &Config,
    identity: &Identity,
    room_hash: &[u8; 32],
    nat: Option<&Classification>,
) -> SenderListeners {
    if config.privacy_mode {
        return SenderListeners {
            quic: None,
            punch_socket: None,
            _advertiser: None,
        };
    }

    let mut quic_port = 0u16;
    let mut quic_cert = String::new();
    let quic_listener = match "0.0.0.0:0"
        .parse()
        .map_err(|_| ())
        .and_then(|bind| quic::QuicListener::bind(bind).map_err(|_| ()))
    {
        Ok(listener) => {
            if let Some(port) = listener.local_port() {
                quic_port = port;
                quic_cert = hex::encode(listener.cert_fingerprint());
            }
            Some(listener)
        }
        Err(()) => {
            debug!("quic listener unavailable");
            None
        }
    };

    let mut udp_port = 0u16;
    let mut public_addr = String::new();
    let punch_socket = match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => {
            let socket = Arc::new(socket);
            if let Ok(addr) = socket.local_addr() {
                udp_port = addr.port();
            }
            // The reflexive lookup doubles as the outbound NAT binding
            // the receiver's probes will land on
            match gather_candidates(&socket, &config.stun_servers, None, false).await {
                Ok(candidates) => {
                    if let Some(reflexive) = candidates
                        .iter()
                        .find(|c| c.kind == CandidateKind::ServerReflexive)
                    {
                        public_addr = reflexive.addr.to_string();
                    }
                }
                Err(e) => debug!("candidate gathering failed: {}", e),
            }
            Some(socket)
        }
        Err(e) => {
            debug!("punch socket unavailable: {}", e);
            None
        }
    };

    let advertiser = LanAdvertiser::new(
        quic_port.max(udp_port).max(4433),
        &Advertisement {
            version: "1".to_string(),
            device_id: hex::encode(&identity.fingerprint()[..4]),
            device_name: hostname(),
            platform: std::env::consts::OS.to_string(),
            capabilities: vec!["quic".to_string(), "punch".to_string(), "relay".to_string()],
            fingerprint: identity.fingerprint_hex(),
            room: hex::encode(&room_hash[..8]),
            quic_port,
            quic_cert,
            udp_port,
            public_addr,
            nat: nat.map(|n| n.class.label().to_string()).unwrap_or_default(),
        },
    )
    .map_err(|e| debug!("LAN advertisement unavailable: {}", e))
    .ok();

    SenderListeners {
        quic: quic_listener,
        punch_socket,
        _advertiser: advertiser,
    }
}

/// Accept whichever path the receiver connects through first
///
/// Mirrors the receiver's fallback order: QUIC accept and the passive
/// punch run alongside the relay room, and the first established channel
/// wins. Direct-path failures never abort the wait; only a relay error
/// is terminal.
async fn accept_any_path(
    config: &Config,
    identity: &Identity,
    code: &RoomCode,
    relay: &str,
    nat: Option<&Classification>,
) -> Result<Channel, CliError> {
    let room_hash = code.hash();
    let listeners = open_sender_listeners(config, identity, &room_hash, nat).await;
    let token = punch_token(&room_hash);

    let quic_accept = async {
        match &listeners.quic {
            Some(listener) => match listener.accept().await {
                Ok(channel) => Channel::Quic(channel),
                Err(e) => {
                    debug!("quic accept failed: {}", e);
                    std::future::pending().await
                }
            },
            None => std::future::pending().await,
        }
    };
    let passive_punch = async {
        match &listeners.punch_socket {
            Some(socket) => {
                match datagram::punch(socket.clone(), &[], token, IDLE_TIMEOUT).await {
                    Ok(channel) => Channel::Datagram(channel),
                    Err(e) => {
                        debug!("passive punch ended: {}", e);
                        std::future::pending().await
                    }
                }
            }
            None => std::future::pending().await,
        }
    };
    let relay_wait = async {
        RelayChannel::connect(
            relay,
            relay_server_name(relay),
            RelayTrust::WebPki,
            room_hash,
            RelayRole::Create,
        )
        .await
        .map(Channel::Relay)
    };

    tokio::select! {
        channel = quic_accept => {
            info!("peer connected over direct quic");
            Ok(channel)
        }
        channel = passive_punch => {
            info!("peer connected over punched datagrams");
            Ok(channel)
        }
        result = relay_wait => Ok(result?),
    }
}

/// Connect along the fallback chain as the receiver
///
/// Builds the plan from the NAT probe, the local candidate gathering,
/// and the sender's LAN rendezvous advertisement, then walks QUIC →
/// punch → relay through the transport selector. Privacy mode strips the
/// direct stages entirely.
async fn connect_any_path(
    config: &Config,
    code: &RoomCode,
    relay: &str,
    nat: Option<&Classification>,
) -> Result<Channel, CliError> {
    let room_hash = code.hash();
    let relay_plan = RelayPlan {
        addr: relay.to_string(),
        server_name: relay_server_name(relay).to_string(),
        trust: RelayTrust::WebPki,
        code_hash: room_hash,
        role: RelayRole::Join,
    };

    let mut plan = FallbackPlan {
        quic: None,
        datagram: None,
        relay: relay_plan,
    };

    if !config.privacy_mode {
        let contact = match discovery::discover_sender(&room_hash, DISCOVER_TIMEOUT).await {
            Ok(contact) => contact,
            Err(e) => {
                debug!("LAN rendezvous unavailable: {}", e);
                None
            }
        };
        if let Some(contact) = contact {
            fill_direct_stages(config, &mut plan, &contact, &room_hash, nat).await;
        }
    }

    match connect_with_fallback(plan).await {
        Ok(channel) => Ok(channel),
        Err(tallow_net::NetworkError::Relay(message)) if message.contains("not found") => {
            // The creator may still be binding its room; keep joining
            join_relay_with_retry(relay, room_hash).await
        }
        Err(e) => Err(e.into()),
    }
}

/// Populate the QUIC and punch stages from the sender's advertisement
async fn fill_direct_stages(
    config: &Config,
    plan: &mut FallbackPlan,
    contact: &SenderContact,
    room_hash: &[u8; 32],
    nat: Option<&Classification>,
) {
    let local_class = nat.map(|n| n.class).unwrap_or(NatClass::Blocked);
    let remote_class = contact
        .nat
        .as_deref()
        .and_then(NatClass::from_label)
        .unwrap_or(NatClass::PortRestricted);
    let strategy = Strategy::select(local_class, remote_class);
    info!(?strategy, "direct-path strategy for LAN sender");
    if !strategy.tries_direct() {
        return;
    }

    if let Some((port, pin)) = contact.quic {
        match "0.0.0.0:0"
            .parse()
            .map_err(|_| ())
            .and_then(|bind| quic::client_endpoint(bind, pin).map_err(|_| ()))
        {
            Ok((endpoint, client_config)) => {
                plan.quic = Some(QuicPlan {
                    endpoint,
                    config: client_config,
                    remote: SocketAddr::new(contact.ip, port),
                });
            }
            Err(()) => debug!("quic client endpoint unavailable"),
        }
    }

    let mut peer_candidates = Vec::new();
    if let Some(port) = contact.udp_port {
        peer_candidates.push(SocketAddr::new(contact.ip, port));
    }
    if let Some(public) = contact.public_addr {
        peer_candidates.push(public);
    }
    peer_candidates.retain(validate_candidate_addr);
    if peer_candidates.is_empty() {
        return;
    }

    match UdpSocket::bind("0.0.0.0:0").await {
        Ok(socket) => {
            let socket = Arc::new(socket);
            // Gathering our own candidates also opens the outbound NAT
            // binding the punch probes will travel through
            match gather_candidates(&socket, &config.stun_servers, None, false).await {
                Ok(local) => debug!(candidates = local.len(), "local candidates gathered"),
                Err(e) => debug!("candidate gathering failed: {}", e),
            }
            plan.datagram = Some(DatagramPlan {
                socket,
                candidates: peer_candidates,
                token: punch_token(room_hash),
                timeout: strategy.direct_timeout(),
            });
        }
        Err(e) => debug!("punch socket unavailable: {}", e),
    }
}

/// Keep joining the relay room until the creator binds it
async fn join_relay_with_retry(relay: &str, room_hash: [u8; 32]) -> Result<Channel, CliError> {
    let deadline = tokio::time::Instant::now() + JOIN_RETRY_BUDGET;
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        match RelayChannel::connect(
            relay,
            relay_server_name(relay),
            RelayTrust::WebPki,
            room_hash,
            RelayRole::Join,
        )
        .await
        {
            Ok(channel) => return Ok(Channel::Relay(channel)),
            Err(tallow_net::NetworkError::Relay(message))
                if message.contains("not found") && tokio::time::Instant::now() < deadline =>
            {
                debug!("room not bound yet; retrying join");
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Wait for the peer on every path and run the handshake as the sender
pub async fn establish_as_sender(
    config: &Config,
    identity: &Identity,
    code: &RoomCode,
    password: Option<&str>,
    relay: &str,
    nat: Option<&Classification>,
) -> Result<Established, CliError> {
    let mut channel = accept_any_path(config, identity, code, relay, nat).await?;

    let (mut driver, hello) = Initiator::start(
        code.clone(),
        password,
        identity.fingerprint(),
        PasswordParams::default(),
        RatchetConfig::default(),
    )?;
    channel.send(Frame::Handshake(hello)).await?;

    loop {
        let frame = recv_handshake(&mut channel).await?;
        match driver.handle(&frame)? {
            Step::Send(reply) => channel.send(Frame::Handshake(reply)).await?,
            Step::SendAndFinish(reply, outcome) => {
                channel.send(Frame::Handshake(reply)).await?;
                return Ok(Established {
                    channel,
                    outcome: *outcome,
                });
            }
            Step::Finish(outcome) => {
                return Ok(Established {
                    channel,
                    outcome: *outcome,
                })
            }
        }
    }
}

/// Connect along the fallback chain and run the handshake as the receiver
pub async fn establish_as_receiver(
    config: &Config,
    identity: &Identity,
    code: &RoomCode,
    password: Option<&str>,
    relay: &str,
    nat: Option<&Classification>,
) -> Result<Established, CliError> {
    let mut channel = connect_any_path(config, code, relay, nat).await?;

    let mut driver = Responder::new(
        code.clone(),
        password,
        identity.fingerprint(),
        PasswordParams::default(),
        RatchetConfig::default(),
    )?;

    loop {
        let frame = recv_handshake(&mut channel).await?;
        match driver.handle(&frame)? {
            Step::Send(reply) => channel.send(Frame::Handshake(reply)).await?,
            Step::SendAndFinish(reply, outcome) => {
                channel.send(Frame::Handshake(reply)).await?;
                return Ok(Established {
                    channel,
                    outcome: *outcome,
                });
            }
            Step::Finish(outcome) => {
                return Ok(Established {
                    channel,
                    outcome: *outcome,
                })
            }
        }
    }
}

/// TLS server name for a relay address: the host part, falling back to
/// the whole string
fn relay_server_name(relay: &str) -> &str {
    relay.rsplit_once(':').map(|(host, _)| host).unwrap_or(relay)
}

async fn recv_handshake(
    channel: &mut Channel,
) -> Result<tallow_protocol::wire::HandshakeFrame, CliError> {
    loop {
        match channel.recv().await? {
            Some(Frame::Handshake(frame)) => return Ok(frame),
            Some(other) => {
                debug!("ignoring non-handshake frame during handshake: {:?}", kind_of(&other));
            }
            None => {
                return Err(CliError::Transport(
                    "peer closed during handshake".to_string(),
                ))
            }
        }
    }
}

fn kind_of(frame: &Frame) -> &'static str {
    match frame {
        Frame::Handshake(_) => "handshake",
        Frame::Chunk(_) => "chunk",
        Frame::Control(_) => "control",
        Frame::Signal(_) => "signal",
        Frame::Secure { .. } => "secure",
    }
}

/// Seal a control frame under the ratchet session and send it
pub async fn send_control(
    session: &mut Session,
    channel: &mut Channel,
    frame: &ControlFrame,
) -> Result<(), CliError> {
    let plaintext = postcard::to_stdvec(frame)
        .map_err(|e| CliError::Transport(format!("control encode: {}", e)))?;
    let (header, ciphertext) = session
        .encrypt(&plaintext, CONTROL_AAD)
        .map_err(|e| CliError::Transport(format!("control seal: {}", e)))?;
    let header = postcard::to_stdvec(&header)
        .map_err(|e| CliError::Transport(format!("header encode: {}", e)))?;
    channel
        .send(Frame::Secure { header, ciphertext })
        .await
        .map_err(Into::into)
}

/// Open a sealed control frame
pub fn open_control(
    session: &mut Session,
    header: &[u8],
    ciphertext: &[u8],
) -> Result<ControlFrame, CliError> {
    let header: Header = postcard::from_bytes(header)
        .map_err(|e| CliError::Transport(format!("header decode: {}", e)))?;
    let plaintext = session
        .decrypt(&header, ciphertext, CONTROL_AAD)
        .map_err(|e| match e {
            tallow_crypto::CryptoError::SessionAborted => CliError::Auth,
            other => CliError::Transport(format!("control open: {}", other)),
        })?;
    postcard::from_bytes(&plaintext)
        .map_err(|e| CliError::Transport(format!("control decode: {}", e)))
}

/// Per-transfer chunk data key from the session transfer secret
pub fn transfer_data_key(transfer_secret: &[u8; 32], transfer_id: &[u8; 16]) -> [u8; 32] {
    let mut info = Vec::with_capacity(24 + 16);
    info.extend_from_slice(b"tallow-chunk-data-key");
    info.extend_from_slice(transfer_id);
    blake3::keyed_hash(transfer_secret, &info)
}

/// Seal a filename: random 24-byte nonce followed by the ciphertext
pub fn seal_filename(transfer_secret: &[u8; 32], name: &str) -> Result<Vec<u8>, CliError> {
    use rand::RngCore;
    let key = blake3::derive_key(tallow_crypto::hash::domain::FILENAME_KEY, transfer_secret);
    let mut nonce = [0u8; XNONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    let sealed = xchacha_seal(&key, &nonce, name.as_bytes(), b"filename")
        .map_err(|e| CliError::Transport(format!("filename seal: {}", e)))?;
    let mut out = Vec::with_capacity(XNONCE_LEN + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a sealed filename, rejecting unsafe names
///
/// Path separators, null bytes, and empty names are refused; the caller
/// falls back to an opaque id in that case.
pub fn open_filename(transfer_secret: &[u8; 32], sealed: &[u8]) -> Result<String, CliError> {
    if sealed.len() < XNONCE_LEN {
        return Err(CliError::Transport("sealed filename too short".into()));
    }
    let key = blake3::derive_key(tallow_crypto::hash::domain::FILENAME_KEY, transfer_secret);
    let nonce: [u8; XNONCE_LEN] = sealed[..XNONCE_LEN].try_into().expect("length checked");
    let plaintext = xchacha_open(&key, &nonce, &sealed[XNONCE_LEN..], b"filename")
        .map_err(|e| CliError::Transport(format!("filename open: {}", e)))?;
    let name = String::from_utf8(plaintext)
        .map_err(|_| CliError::User("filename is not valid UTF-8".into()))?;
    if name.is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name.contains('\0')
        || name == "."
        || name == ".."
    {
        return Err(CliError::User(format!(
            "refusing unsafe filename {:?}",
            name
        )));
    }
    Ok(name)
}

/// Drop-in sanity check used by both drivers before any bytes move
pub fn require(condition: bool, message: &str) -> Result<(), CliError> {
    if condition {
        Ok(())
    } else {
        Err(CliError::User(message.to_string()))
    }
}

/// One inbound event relevant to a transfer driver
#[derive(Debug)]
pub enum Event {
    /// A sealed control frame, opened
    Control(ControlFrame),
    /// An encrypted chunk frame
    Chunk(tallow_protocol::wire::ChunkFrame),
    /// The peer closed the channel
    Closed,
}

/// Await the next transfer event, opening sealed control frames
///
/// A session idle for five minutes is closed rather than left hanging.
pub async fn next_event(
    session: &mut Session,
    channel: &mut Channel,
) -> Result<Event, CliError> {
    tokio::time::timeout(
        tallow_net::transport::IDLE_TIMEOUT,
        next_event_inner(session, channel),
    )
    .await
    .map_err(|_| CliError::Transport("session idle timeout".to_string()))?
}

async fn next_event_inner(
    session: &mut Session,
    channel: &mut Channel,
) -> Result<Event, CliError> {
    loop {
        match channel.recv().await? {
            Some(Frame::Secure { header, ciphertext }) => {
                return Ok(Event::Control(open_control(session, &header, &ciphertext)?));
            }
            Some(Frame::Chunk(frame)) => return Ok(Event::Chunk(frame)),
            Some(Frame::Handshake(_)) | Some(Frame::Signal(_)) | Some(Frame::Control(_)) => {
                debug!("ignoring out-of-phase frame during transfer");
            }
            None => return Ok(Event::Closed),
        }
    }
}

/// Non-blocking variant: drain one event if immediately available
pub async fn poll_event(
    session: &mut Session,
    channel: &mut Channel,
) -> Result<Option<Event>, CliError> {
    match tokio::time::timeout(std::time::Duration::ZERO, next_event_inner(session, channel))
        .await
    {
        Ok(event) => event.map(Some),
        Err(_) => Ok(None),
    }
}
