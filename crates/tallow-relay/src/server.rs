//! The relay server loop
//!
//! Accepts TLS connections, runs the short room-binding exchange, then
//! degrades into a byte pump: two concurrent copies per room, no
//! inspection, a byte counter, and a hard per-room cap with graceful
//! close. SIGTERM stops the accept loop and drains live rooms for up to
//! the configured budget.

use crate::config::RelayConfig;
use crate::rate_limit::{JoinLockout, RateLimiter};
use crate::rooms::{PeerReceiver, PeerSender, RoomId, RoomTable};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tallow_net::relay::proto::{read_message, write_message, RelayRequest, RelayResponse};
use tallow_net::transport::tls;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Copy-buffer size for the pump
const PUMP_BUF: usize = 16 * 1024;

/// Shared server state
struct ServerState {
    config: RelayConfig,
    rooms: RoomTable,
    create_limiter: RateLimiter,
    join_limiter: RateLimiter,
    lockout: JoinLockout,
}

/// A bound relay server, ready to run
pub struct RelayServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    cert_der: Vec<u8>,
    state: Arc<ServerState>,
}

/// Run the relay until `shutdown` fires, then drain
pub async fn serve(config: RelayConfig, shutdown: CancellationToken) -> anyhow::Result<()> {
    RelayServer::bind(config).await?.run(shutdown).await
}

impl RelayServer {
    /// Bind the listener and generate the TLS identity
    pub async fn bind(config: RelayConfig) -> anyhow::Result<Self> {
        let (tls_config, cert_der) = tls::self_signed_server()
            .map_err(|e| anyhow::anyhow!("tls setup: {}", e))?;
        let acceptor = TlsAcceptor::from(Arc::new(tls_config));

        let bind = format!("0.0.0.0:{}", config.port);
        let listener = TcpListener::bind(&bind).await?;
        info!(
            addr = %bind,
            cert_fingerprint = %hex::encode(tls::cert_fingerprint(&cert_der)),
            "relay listening"
        );

        let state = Arc::new(ServerState {
            create_limiter: RateLimiter::new(config.creates_per_minute, Duration::from_secs(60)),
            join_limiter: RateLimiter::new(config.joins_per_minute, Duration::from_secs(60)),
            lockout: JoinLockout::new(config.lockout_threshold, config.lockout_duration),
            rooms: RoomTable::new(config.max_rooms),
            config,
        });

        Ok(Self {
            listener,
            acceptor,
            cert_der,
            state,
        })
    }

    /// The bound local address
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// BLAKE3 fingerprint of the TLS certificate, for client pinning
    pub fn cert_fingerprint(&self) -> [u8; 32] {
        tls::cert_fingerprint(&self.cert_der)
    }

    /// Serve until `shutdown` fires, then drain live rooms
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let RelayServer {
            listener,
            acceptor,
            cert_der: _,
            state,
        } = self;

        // Deterministic cleanup: TTL expiry and limiter pruning once a minute
        let janitor_state = state.clone();
        let janitor_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let expired = janitor_state.rooms.expire(janitor_state.config.ttl);
                        if expired > 0 {
                            info!(expired, "expired rooms past ttl");
                        }
                        janitor_state.create_limiter.prune();
                        janitor_state.join_limiter.prune();
                        janitor_state.lockout.prune();
                    }
                    _ = janitor_shutdown.cancelled() => break,
                }
            }
        });

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (tcp, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("accept failed: {}", e);
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let state = state.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(tcp, peer_addr.ip(), acceptor, state).await {
                            debug!(peer = %peer_addr, "connection ended: {}", e);
                        }
                    });
                }
                _ = shutdown.cancelled() => break,
            }
        }

        // Drain: let live rooms finish for up to the configured budget
        info!(
            rooms = state.rooms.len(),
            "shutdown requested; draining rooms"
        );
        let drain_deadline = tokio::time::Instant::now() + state.config.drain_timeout;
        while !state.rooms.is_empty() && tokio::time::Instant::now() < drain_deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
        info!(remaining = state.rooms.len(), "relay stopped");
        Ok(())
    }
}

async fn handle_connection(
    tcp: TcpStream,
    peer_ip: IpAddr,
    acceptor: TlsAcceptor,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    tcp.set_nodelay(true)?;
    let mut stream = acceptor.accept(tcp).await?;

    let request: RelayRequest = read_message(&mut stream).await?;
    match request {
        RelayRequest::CreateRoom { code_hash } => {
            handle_create(stream, peer_ip, code_hash, state).await
        }
        RelayRequest::JoinRoom { code_hash } => {
            handle_join(stream, peer_ip, code_hash, state).await
        }
    }
}

/// Shard redirect check; responds and returns true when redirected
async fn redirect_if_foreign(
    stream: &mut TlsStream<TcpStream>,
    code_hash: &RoomId,
    state: &ServerState,
) -> anyhow::Result<bool> {
    if let Some(shard) = state.config.shard_for(code_hash) {
        if shard != state.config.shard_index {
            let addr = state.config.shards[shard].clone();
            debug!(shard, "redirecting room to owning shard");
            write_message(stream, &RelayResponse::Redirect { addr }).await?;
            return Ok(true);
        }
    }
    Ok(false)
}

async fn handle_create(
    mut stream: TlsStream<TcpStream>,
    peer_ip: IpAddr,
    code_hash: RoomId,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    if !state.create_limiter.check(peer_ip) {
        write_message(
            &mut stream,
            &RelayResponse::Error {
                message: "rate limited".into(),
            },
        )
        .await?;
        return Ok(());
    }
    if redirect_if_foreign(&mut stream, &code_hash, &state).await? {
        return Ok(());
    }

    let created = match state.rooms.create(code_hash) {
        Ok(created) => created,
        Err(e) => {
            write_message(
                &mut stream,
                &RelayResponse::Error {
                    message: e.to_string(),
                },
            )
            .await?;
            return Ok(());
        }
    };

    write_message(&mut stream, &RelayResponse::RoomCreated).await?;

    // Wait for the joiner; creator disconnect or shutdown tears the room
    // down. The close token doubles as the shutdown observer.
    tokio::select! {
        _ = created.joined.cancelled() => {}
        _ = created.closed.cancelled() => {
            state.rooms.close(&code_hash);
            return Ok(());
        }
        result = wait_for_disconnect(&mut stream) => {
            debug!("creator left before peer joined: {:?}", result);
            state.rooms.close(&code_hash);
            return Ok(());
        }
    }

    write_message(&mut stream, &RelayResponse::PeerJoined).await?;

    let peer_tx = state
        .rooms
        .joiner_sender(&code_hash)
        .ok_or_else(|| anyhow::anyhow!("joiner vanished before pump start"))?;

    pump(
        stream,
        created.rx,
        peer_tx,
        created.bytes_relayed,
        created.active,
        created.closed,
        state.config.max_bytes_per_room,
    )
    .await;
    state.rooms.close(&code_hash);
    Ok(())
}

async fn handle_join(
    mut stream: TlsStream<TcpStream>,
    peer_ip: IpAddr,
    code_hash: RoomId,
    state: Arc<ServerState>,
) -> anyhow::Result<()> {
    if !state.join_limiter.check(peer_ip) {
        write_message(
            &mut stream,
            &RelayResponse::Error {
                message: "rate limited".into(),
            },
        )
        .await?;
        return Ok(());
    }
    if redirect_if_foreign(&mut stream, &code_hash, &state).await? {
        return Ok(());
    }
    if state.lockout.is_locked(&code_hash) {
        write_message(
            &mut stream,
            &RelayResponse::Error {
                message: "room locked".into(),
            },
        )
        .await?;
        return Ok(());
    }

    let joined = match state.rooms.join(&code_hash) {
        Ok(joined) => joined,
        Err(e) => {
            if state.lockout.record_failure(code_hash) {
                warn!("room locked out after repeated failed joins");
            }
            write_message(
                &mut stream,
                &RelayResponse::Error {
                    message: e.to_string(),
                },
            )
            .await?;
            return Ok(());
        }
    };
    state.lockout.record_success(&code_hash);

    write_message(&mut stream, &RelayResponse::Joined).await?;

    pump(
        stream,
        joined.rx,
        joined.peer_tx,
        joined.bytes_relayed,
        joined.active,
        joined.closed,
        state.config.max_bytes_per_room,
    )
    .await;
    state.rooms.close(&code_hash);
    Ok(())
}

/// Detect a creator disconnecting while parked in the waiting state
async fn wait_for_disconnect(stream: &mut TlsStream<TcpStream>) -> std::io::Result<()> {
    // Peers send nothing before PeerJoined; any read completion here
    // means EOF, an error, or a protocol violation - all end the room
    let mut buf = [0u8; 1];
    let _ = stream.read(&mut buf).await?;
    Ok(())
}

/// The zero-knowledge pump: socket reads go to the peer, peer bytes go
/// to the socket, until either side ends, the cap trips, or the room
/// closes. The first bytes moved flip the room to ACTIVE.
async fn pump(
    stream: TlsStream<TcpStream>,
    mut from_peer: PeerReceiver,
    to_peer: PeerSender,
    bytes_relayed: Arc<AtomicU64>,
    active: Arc<AtomicBool>,
    closed: CancellationToken,
    max_bytes: u64,
) {
    let (mut read_half, mut write_half) = tokio::io::split(stream);

    let cap_closed = closed.clone();
    let counter = bytes_relayed.clone();
    let inbound = async move {
        let mut buf = vec![0u8; PUMP_BUF];
        loop {
            match read_half.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    RoomTable::mark_active(&active);
                    let total = counter.fetch_add(n as u64, Ordering::Relaxed) + n as u64;
                    if total > max_bytes {
                        info!(total, "room exceeded byte cap; closing");
                        cap_closed.cancel();
                        break;
                    }
                    if to_peer.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    };

    let outbound = async move {
        while let Some(bytes) = from_peer.recv().await {
            if write_half.write_all(&bytes).await.is_err() {
                break;
            }
        }
        let _ = write_half.shutdown().await;
    };

    tokio::select! {
        _ = async { tokio::join!(inbound, outbound) } => {}
        _ = closed.cancelled() => {}
    }
}
