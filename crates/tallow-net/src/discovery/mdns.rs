//! mDNS LAN discovery
//!
//! Advertises and browses `_tallow._tcp.local.`. TXT records:
//!
//! - `version`: protocol version
//! - `device-id`: stable random device id
//! - `device-name`: human-readable name
//! - `platform`: os family
//! - `capabilities`: comma-separated feature list
//! - `public-key-fingerprint`: hex BLAKE3 of the identity verifying key
//!
//! Browse results expire after 60 seconds without a refresh.

use crate::discovery::merge::{DiscoveredPeer, PeerSource};
use crate::{NetworkError, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Tallow mDNS service type
pub const SERVICE_TYPE: &str = "_tallow._tcp.local.";

/// Entries older than this are dropped from browse results
pub const ENTRY_TTL: Duration = Duration::from_secs(60);

/// TXT payload for an advertisement
///
/// The rendezvous fields let a same-LAN receiver find the sender for a
/// specific room and connect directly: the room-hash prefix scopes the
/// match, and the ports/cert/nat entries are everything the fallback
/// selector needs to build its direct stages.
#[derive(Debug, Clone, Default)]
pub struct Advertisement {
    /// Protocol version string
    pub version: String,
    /// Stable device id
    pub device_id: String,
    /// Human-readable device name
    pub device_name: String,
    /// Platform family ("linux", "macos", "windows")
    pub platform: String,
    /// Capability list
    pub capabilities: Vec<String>,
    /// Hex fingerprint of the identity key
    pub fingerprint: String,
    /// Room-hash prefix (16 hex chars) this sender is waiting on; empty
    /// when idle
    pub room: String,
    /// QUIC listener port; 0 when no listener is up
    pub quic_port: u16,
    /// Hex BLAKE3 fingerprint of the QUIC certificate; empty without one
    pub quic_cert: String,
    /// Hole-punch listener port; 0 when none
    pub udp_port: u16,
    /// STUN-discovered public address of the punch socket; empty if
    /// unknown or withheld
    pub public_addr: String,
    /// Advertised NAT class label (see `NatClass::label`)
    pub nat: String,
}

/// Advertises this device on the LAN; unregisters on drop
pub struct LanAdvertiser {
    daemon: ServiceDaemon,
    service_fullname: String,
}

impl LanAdvertiser {
    /// Register the service on the given port
    pub fn new(port: u16, advert: &Advertisement) -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| NetworkError::Discovery(format!("mdns daemon: {}", e)))?;

        let instance_name = format!("tallow-{}", &advert.device_id);
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "tallow-peer".to_string());

        let mut properties = HashMap::new();
        properties.insert("version".to_string(), advert.version.clone());
        properties.insert("device-id".to_string(), advert.device_id.clone());
        properties.insert("device-name".to_string(), advert.device_name.clone());
        properties.insert("platform".to_string(), advert.platform.clone());
        properties.insert("capabilities".to_string(), advert.capabilities.join(","));
        properties.insert(
            "public-key-fingerprint".to_string(),
            advert.fingerprint.clone(),
        );
        properties.insert("room".to_string(), advert.room.clone());
        properties.insert("quic-port".to_string(), advert.quic_port.to_string());
        properties.insert("quic-cert".to_string(), advert.quic_cert.clone());
        properties.insert("udp-port".to_string(), advert.udp_port.to_string());
        properties.insert("public-addr".to_string(), advert.public_addr.clone());
        properties.insert("nat".to_string(), advert.nat.clone());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{}.", hostname),
            "",
            port,
            properties,
        )
        .map_err(|e| NetworkError::Discovery(format!("service info: {}", e)))?
        .enable_addr_auto();

        let fullname = service.get_fullname().to_string();
        daemon
            .register(service)
            .map_err(|e| NetworkError::Discovery(format!("mdns register: {}", e)))?;

        info!("advertising {} on port {}", instance_name, port);

        Ok(Self {
            daemon,
            service_fullname: fullname,
        })
    }
}

impl Drop for LanAdvertiser {
    fn drop(&mut self) {
        debug!("unregistering mdns service {}", self.service_fullname);
        let _ = self.daemon.unregister(&self.service_fullname);
        let _ = self.daemon.shutdown();
    }
}

/// Browse the LAN for peers for up to `timeout`
pub async fn browse(timeout: Duration) -> Result<Vec<DiscoveredPeer>> {
    let daemon = ServiceDaemon::new()
        .map_err(|e| NetworkError::Discovery(format!("mdns daemon: {}", e)))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| NetworkError::Discovery(format!("mdns browse: {}", e)))?;

    let mut peers: HashMap<String, DiscoveredPeer> = HashMap::new();
    let deadline = Instant::now() + timeout;

    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = tokio::task::block_in_place(|| receiver.recv_timeout(remaining));
        match event {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                if let Some(peer) = peer_from_service(&info) {
                    debug!("resolved LAN peer {}", peer.fingerprint);
                    peers.insert(peer.fingerprint.clone(), peer);
                }
            }
            Ok(ServiceEvent::ServiceRemoved(_, fullname)) => {
                peers.retain(|_, p| p.instance != fullname);
            }
            Ok(_) => {}
            Err(_) => break, // timeout or channel closed
        }
    }

    let _ = daemon.shutdown();

    // Expire anything stale (relevant for long-running browsers that call
    // repeatedly and merge results)
    let now = Instant::now();
    let mut result: Vec<DiscoveredPeer> = peers
        .into_values()
        .filter(|p| now.duration_since(p.seen_at) < ENTRY_TTL)
        .collect();
    result.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    Ok(result)
}

/// Everything a receiver needs to dial a LAN sender directly
#[derive(Debug, Clone)]
pub struct SenderContact {
    /// The sender's LAN address
    pub ip: IpAddr,
    /// QUIC listener, when one is up
    pub quic: Option<(u16, [u8; 32])>,
    /// Hole-punch listener port, when one is up
    pub udp_port: Option<u16>,
    /// The sender's STUN-discovered public address
    pub public_addr: Option<SocketAddr>,
    /// The sender's advertised NAT class label
    pub nat: Option<String>,
    /// Identity fingerprint (hex)
    pub fingerprint: String,
}

/// Browse for the sender advertising a specific room
///
/// Matches the `room` TXT record against the first 8 bytes of the room
/// hash; returns the first matching sender, or None at the timeout.
pub async fn discover_sender(
    room_hash: &[u8; 32],
    timeout: Duration,
) -> Result<Option<SenderContact>> {
    let expected_room = hex::encode(&room_hash[..8]);

    let daemon = ServiceDaemon::new()
        .map_err(|e| NetworkError::Discovery(format!("mdns daemon: {}", e)))?;
    let receiver = daemon
        .browse(SERVICE_TYPE)
        .map_err(|e| NetworkError::Discovery(format!("mdns browse: {}", e)))?;

    let deadline = Instant::now() + timeout;
    let mut found = None;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = tokio::task::block_in_place(|| receiver.recv_timeout(remaining));
        match event {
            Ok(ServiceEvent::ServiceResolved(info)) => {
                if info.get_property_val_str("room") != Some(expected_room.as_str()) {
                    continue;
                }
                if let Some(contact) = contact_from_service(&info) {
                    debug!(fingerprint = %contact.fingerprint, "found LAN sender for room");
                    found = Some(contact);
                    break;
                }
            }
            Ok(_) => {}
            Err(_) => break,
        }
    }

    let _ = daemon.shutdown();
    Ok(found)
}

fn contact_from_service(info: &ServiceInfo) -> Option<SenderContact> {
    let fingerprint = info
        .get_property_val_str("public-key-fingerprint")?
        .to_string();
    if fingerprint.is_empty() || hex::decode(&fingerprint).is_err() {
        warn!("ignoring LAN sender with malformed fingerprint");
        return None;
    }
    let ip: IpAddr = info.get_addresses().iter().next().copied()?;

    let port_of = |key: &str| -> Option<u16> {
        info.get_property_val_str(key)
            .and_then(|v| v.parse::<u16>().ok())
            .filter(|p| *p != 0)
    };
    let quic = match (port_of("quic-port"), info.get_property_val_str("quic-cert")) {
        (Some(port), Some(cert_hex)) if !cert_hex.is_empty() => {
            let bytes = hex::decode(cert_hex).ok()?;
            let pin: [u8; 32] = bytes.as_slice().try_into().ok()?;
            Some((port, pin))
        }
        _ => None,
    };
    let public_addr = info
        .get_property_val_str("public-addr")
        .filter(|v| !v.is_empty())
        .and_then(|v| v.parse::<SocketAddr>().ok());
    let nat = info
        .get_property_val_str("nat")
        .filter(|v| !v.is_empty())
        .map(|v| v.to_string());

    Some(SenderContact {
        ip,
        quic,
        udp_port: port_of("udp-port"),
        public_addr,
        nat,
        fingerprint,
    })
}

fn peer_from_service(info: &ServiceInfo) -> Option<DiscoveredPeer> {
    let fingerprint = info
        .get_property_val_str("public-key-fingerprint")?
        .to_string();
    let device_name = info
        .get_property_val_str("device-name")
        .unwrap_or("unknown")
        .to_string();
    let ip: IpAddr = info.get_addresses().iter().next().copied()?;
    let addr = SocketAddr::new(ip, info.get_port());

    if fingerprint.is_empty() || hex::decode(&fingerprint).is_err() {
        warn!("ignoring LAN peer with malformed fingerprint");
        return None;
    }

    Some(DiscoveredPeer {
        fingerprint,
        name: device_name,
        addr,
        source: PeerSource::Lan,
        instance: info.get_fullname().to_string(),
        seen_at: Instant::now(),
    })
}
