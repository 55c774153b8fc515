//! Transport selection with a fallback chain
//!
//! Priority order: QUIC, then the hole-punched datagram path, then the
//! TLS relay. A failed attempt falls through to the next within five
//! seconds; only when the terminal fallback fails does the connect
//! surface an error.

use crate::transport::datagram;
use crate::transport::quic::QuicChannel;
use crate::transport::relay_tcp::{RelayChannel, RelayRole, RelayTrust};
use crate::transport::Channel;
use crate::{NetworkError, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{info, warn};

/// Ceiling on each fallback attempt
pub const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// QUIC attempt description
pub struct QuicPlan {
    /// Local endpoint to connect from
    pub endpoint: quinn::Endpoint,
    /// Client config (pinned to the peer's advertised certificate)
    pub config: quinn::ClientConfig,
    /// Peer address
    pub remote: SocketAddr,
}

/// Hole-punch attempt description
pub struct DatagramPlan {
    /// Socket shared with candidate gathering (same mapped port)
    pub socket: Arc<UdpSocket>,
    /// Peer candidate addresses, priority order
    pub candidates: Vec<SocketAddr>,
    /// Punch token shared through signaling
    pub token: [u8; 16],
    /// Punch budget from the NAT strategy matrix
    pub timeout: Duration,
}

/// Relay attempt description
pub struct RelayPlan {
    /// Relay address (host:port)
    pub addr: String,
    /// TLS server name
    pub server_name: String,
    /// Trust mode for the relay certificate
    pub trust: RelayTrust,
    /// Room code hash
    pub code_hash: [u8; 32],
    /// Create or join
    pub role: RelayRole,
}

/// The full fallback plan; omitted stages are skipped
pub struct FallbackPlan {
    /// Stage 1: QUIC
    pub quic: Option<QuicPlan>,
    /// Stage 2: hole-punched datagrams
    pub datagram: Option<DatagramPlan>,
    /// Stage 3: TLS relay (always present - the terminal fallback)
    pub relay: RelayPlan,
}

/// Walk the fallback chain until a channel connects
pub async fn connect_with_fallback(plan: FallbackPlan) -> Result<Channel> {
    if let Some(quic) = plan.quic {
        info!("transport attempt 1: quic to {}", quic.remote);
        match tokio::time::timeout(
            ATTEMPT_TIMEOUT,
            QuicChannel::connect(&quic.endpoint, quic.config, quic.remote),
        )
        .await
        {
            Ok(Ok(channel)) => return Ok(Channel::Quic(channel)),
            Ok(Err(e)) => warn!("quic attempt failed: {}", e),
            Err(_) => warn!("quic attempt timed out"),
        }
    }

    if let Some(datagram_plan) = plan.datagram {
        info!(
            "transport attempt 2: hole punch across {} candidates",
            datagram_plan.candidates.len()
        );
        let budget = datagram_plan.timeout.min(ATTEMPT_TIMEOUT);
        match datagram::punch(
            datagram_plan.socket,
            &datagram_plan.candidates,
            datagram_plan.token,
            budget,
        )
        .await
        {
            Ok(channel) => return Ok(Channel::Datagram(channel)),
            Err(e) => warn!("hole punch failed: {}", e),
        }
    }

    // The terminal fallback gets no attempt timeout: a room creator
    // legitimately blocks here until the peer joins
    info!("transport attempt 3: relay {}", plan.relay.addr);
    let channel = RelayChannel::connect(
        &plan.relay.addr,
        &plan.relay.server_name,
        plan.relay.trust,
        plan.relay.code_hash,
        plan.relay.role,
    )
    .await?;
    Ok(Channel::Relay(channel))
}
