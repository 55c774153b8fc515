//! Candidate gathering and filtering
//!
//! Gathers host, server-reflexive, and relay candidates for the peer to
//! race against. Privacy mode strips everything but relay candidates,
//! and mDNS `.local` hostnames never leave the machine in any mode.

use crate::nat::stun;
use crate::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tracing::{debug, warn};

/// Overall budget for candidate gathering
pub const GATHER_TIMEOUT: Duration = Duration::from_secs(5);

/// Candidate types, in descending preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Local interface address
    Host,
    /// STUN-discovered reflexive address
    ServerReflexive,
    /// TURN/relay allocation
    Relay,
}

/// A connection candidate offered to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// Socket address to try
    pub addr: SocketAddr,
    /// Candidate type
    pub kind: CandidateKind,
    /// Priority, higher preferred (host 100, reflexive 50, relay 20)
    pub priority: u32,
}

/// Gather candidates from a bound socket
///
/// The socket must be the one later used for hole punching, so the
/// reflexive mapping refers to the right port. `relay_candidate` is the
/// pre-allocated TURN/relay address when one exists. In privacy mode
/// only the relay candidate survives.
pub async fn gather_candidates(
    socket: &UdpSocket,
    stun_servers: &[String],
    relay_candidate: Option<SocketAddr>,
    privacy_mode: bool,
) -> Result<Vec<Candidate>> {
    let mut candidates = Vec::new();

    if !privacy_mode {
        match host_candidate(socket) {
            Ok(addr) => candidates.push(Candidate {
                addr,
                kind: CandidateKind::Host,
                priority: 100,
            }),
            Err(e) => debug!("no host candidate: {}", e),
        }

        match tokio::time::timeout(GATHER_TIMEOUT, reflexive_candidate(socket, stun_servers))
            .await
        {
            Ok(Ok(addr)) => candidates.push(Candidate {
                addr,
                kind: CandidateKind::ServerReflexive,
                priority: 50,
            }),
            Ok(Err(e)) => warn!("reflexive gathering failed: {}", e),
            Err(_) => warn!("reflexive gathering timed out"),
        }
    }

    if let Some(addr) = relay_candidate {
        candidates.push(Candidate {
            addr,
            kind: CandidateKind::Relay,
            priority: 20,
        });
    }

    candidates.retain(|c| validate_candidate_addr(&c.addr));
    candidates.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(candidates)
}

/// The local default-route address on the socket's port
fn host_candidate(socket: &UdpSocket) -> Result<SocketAddr> {
    let port = socket.local_addr()?.port();
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect("8.8.8.8:80")?;
    let ip = probe.local_addr()?.ip();
    Ok(SocketAddr::new(ip, port))
}

/// First responsive STUN server's view of us
async fn reflexive_candidate(socket: &UdpSocket, stun_servers: &[String]) -> Result<SocketAddr> {
    for server in stun_servers {
        let Ok(server_addr) = stun::resolve(server).await else {
            continue;
        };
        match stun::binding_request(socket, server_addr, None, stun::REQUEST_TIMEOUT).await {
            Ok(mapped) => return Ok(mapped),
            Err(e) => debug!("stun {} failed: {}", server, e),
        }
    }
    Err(NetworkError::Stun("no responsive STUN server".into()))
}

/// Reject addresses that must never be dialed
///
/// Loopback, multicast, unspecified, link-local, and broadcast addresses
/// are dropped so a malicious peer cannot steer connections inward.
pub fn validate_candidate_addr(addr: &SocketAddr) -> bool {
    let ip = addr.ip();
    if ip.is_loopback() || ip.is_multicast() || ip.is_unspecified() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => {
            if v4.octets()[0] == 169 && v4.octets()[1] == 254 {
                return false;
            }
            if v4 == Ipv4Addr::BROADCAST {
                return false;
            }
        }
        IpAddr::V6(v6) => {
            if v6.segments()[0] & 0xffc0 == 0xfe80 {
                return false;
            }
        }
    }
    addr.port() > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_unroutable() {
        assert!(!validate_candidate_addr(&"127.0.0.1:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"0.0.0.0:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"169.254.1.1:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"224.0.0.1:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"255.255.255.255:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"[fe80::1]:1000".parse().unwrap()));
        assert!(!validate_candidate_addr(&"192.0.2.1:0".parse().unwrap()));
    }

    #[test]
    fn test_validation_accepts_routable() {
        assert!(validate_candidate_addr(&"203.0.113.9:4433".parse().unwrap()));
        assert!(validate_candidate_addr(&"192.168.1.40:52000".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_privacy_mode_keeps_only_relay() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay: SocketAddr = "203.0.113.50:3478".parse().unwrap();
        let candidates = gather_candidates(&socket, &[], Some(relay), true)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].kind, CandidateKind::Relay);
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let relay: SocketAddr = "203.0.113.50:3478".parse().unwrap();
        // No STUN servers: host + relay at most
        let candidates = gather_candidates(&socket, &[], Some(relay), false)
            .await
            .unwrap();
        for pair in candidates.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }
}
