//! NAT classification from reflexive mappings
//!
//! Binding requests go to at least two distinct STUN servers from the
//! same local socket; comparing the reflexive mappings separates
//! symmetric NATs from cone NATs, and RFC 3489 CHANGE-REQUEST probes
//! refine the cone family. Servers without CHANGE-REQUEST support
//! degrade the answer conservatively (toward PortRestricted), never
//! optimistically.

use crate::nat::stun;
use crate::{NetworkError, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::{debug, info};

/// NAT mapping behavior classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NatClass {
    /// Publicly reachable, no translation
    Open,
    /// Same mapping for all destinations; unsolicited inbound allowed
    FullCone,
    /// Same mapping; inbound only from previously-contacted IPs
    Restricted,
    /// Same mapping; inbound only from previously-contacted IP:port
    PortRestricted,
    /// Mapping varies per destination
    Symmetric,
    /// No UDP connectivity at all
    Blocked,
}

impl NatClass {
    /// Whether direct connection attempts are worth making at all
    pub fn direct_viable(self) -> bool {
        !matches!(self, NatClass::Symmetric | NatClass::Blocked)
    }

    /// Short label for advertisement records
    pub fn label(self) -> &'static str {
        match self {
            NatClass::Open => "open",
            NatClass::FullCone => "full-cone",
            NatClass::Restricted => "restricted",
            NatClass::PortRestricted => "port-restricted",
            NatClass::Symmetric => "symmetric",
            NatClass::Blocked => "blocked",
        }
    }

    /// Parse an advertisement label
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "open" => Some(NatClass::Open),
            "full-cone" => Some(NatClass::FullCone),
            "restricted" => Some(NatClass::Restricted),
            "port-restricted" => Some(NatClass::PortRestricted),
            "symmetric" => Some(NatClass::Symmetric),
            "blocked" => Some(NatClass::Blocked),
            _ => None,
        }
    }
}

/// The classification result, cached per session
#[derive(Debug, Clone, Copy)]
pub struct Classification {
    /// The NAT class
    pub class: NatClass,
    /// Our reflexive address as the first server saw it
    pub mapped: Option<SocketAddr>,
}

/// Classify the local NAT using the given STUN servers
///
/// Needs at least two servers for the symmetric test; with exactly one
/// responsive server the result degrades to the cone-family probes only.
pub async fn classify(socket: &UdpSocket, servers: &[String]) -> Result<Classification> {
    if servers.is_empty() {
        return Err(NetworkError::Stun("no STUN servers configured".into()));
    }

    // Collect reflexive mappings from every responsive server
    let mut mappings: Vec<(SocketAddr, SocketAddr)> = Vec::new();
    for server in servers {
        let server_addr = match stun::resolve(server).await {
            Ok(addr) => addr,
            Err(e) => {
                debug!("stun server {} unresolvable: {}", server, e);
                continue;
            }
        };
        match stun::binding_request(socket, server_addr, None, stun::REQUEST_TIMEOUT).await {
            Ok(mapped) => mappings.push((server_addr, mapped)),
            Err(e) => debug!("stun server {} unresponsive: {}", server, e),
        }
    }

    let Some(&(first_server, first_mapped)) = mappings.first() else {
        info!("no STUN server responded; classifying as blocked");
        return Ok(Classification {
            class: NatClass::Blocked,
            mapped: None,
        });
    };

    // Open internet: the reflexive address equals the local address
    if let Ok(local) = local_address(socket) {
        if local == first_mapped {
            return Ok(Classification {
                class: NatClass::Open,
                mapped: Some(first_mapped),
            });
        }
    }

    // Symmetric: mappings differ across destinations
    if mappings.iter().any(|(_, m)| *m != first_mapped) {
        return Ok(Classification {
            class: NatClass::Symmetric,
            mapped: Some(first_mapped),
        });
    }

    // Cone family: refine with CHANGE-REQUEST probes. Absence of an
    // answer means either a stricter NAT or a server without RFC 3489
    // support - both degrade toward the stricter class.
    let change_both = stun::binding_request(
        socket,
        first_server,
        Some(stun::CHANGE_IP | stun::CHANGE_PORT),
        stun::REQUEST_TIMEOUT,
    )
    .await;
    if change_both.is_ok() {
        return Ok(Classification {
            class: NatClass::FullCone,
            mapped: Some(first_mapped),
        });
    }

    let change_port = stun::binding_request(
        socket,
        first_server,
        Some(stun::CHANGE_PORT),
        stun::REQUEST_TIMEOUT,
    )
    .await;
    let class = if change_port.is_ok() {
        NatClass::Restricted
    } else {
        NatClass::PortRestricted
    };

    Ok(Classification {
        class,
        mapped: Some(first_mapped),
    })
}

/// The socket's own address with the default-route local IP filled in
fn local_address(socket: &UdpSocket) -> Result<SocketAddr> {
    let bound = socket.local_addr()?;
    if !bound.ip().is_unspecified() {
        return Ok(bound);
    }
    // Discover the default-route interface address without sending
    let probe = std::net::UdpSocket::bind("0.0.0.0:0")?;
    probe.connect("8.8.8.8:80")?;
    let ip: IpAddr = probe.local_addr()?.ip();
    Ok(SocketAddr::new(ip, bound.port()))
}
