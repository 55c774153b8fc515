//! Unified peer list
//!
//! LAN-discovered and signaling-discovered peers merge into one list,
//! deduplicated by identity fingerprint. On a fingerprint match the LAN
//! entry wins - same device, lower-latency path.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

/// Where a peer entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSource {
    /// mDNS on the local network
    Lan,
    /// The signaling server
    Signaling,
}

/// One discovered peer
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    /// Hex identity fingerprint (dedup key)
    pub fingerprint: String,
    /// Human-readable device name
    pub name: String,
    /// Address to reach the peer at
    pub addr: SocketAddr,
    /// Discovery source
    pub source: PeerSource,
    /// mDNS instance name (empty for signaled peers)
    pub instance: String,
    /// When this entry was last refreshed
    pub seen_at: Instant,
}

/// Merge peer lists, preferring LAN entries on fingerprint collision
pub fn merge_peers(
    lan: Vec<DiscoveredPeer>,
    signaled: Vec<DiscoveredPeer>,
) -> Vec<DiscoveredPeer> {
    let mut by_fingerprint: HashMap<String, DiscoveredPeer> = HashMap::new();
    for peer in signaled {
        by_fingerprint.insert(peer.fingerprint.clone(), peer);
    }
    for peer in lan {
        // LAN always replaces a signaled entry for the same identity
        by_fingerprint.insert(peer.fingerprint.clone(), peer);
    }
    let mut merged: Vec<DiscoveredPeer> = by_fingerprint.into_values().collect();
    merged.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(fp: &str, source: PeerSource, addr: &str) -> DiscoveredPeer {
        DiscoveredPeer {
            fingerprint: fp.to_string(),
            name: format!("device-{}", fp),
            addr: addr.parse().unwrap(),
            source,
            instance: String::new(),
            seen_at: Instant::now(),
        }
    }

    #[test]
    fn test_lan_wins_on_collision() {
        let lan = vec![peer("aa11", PeerSource::Lan, "192.168.1.5:4000")];
        let signaled = vec![peer("aa11", PeerSource::Signaling, "203.0.113.5:4000")];
        let merged = merge_peers(lan, signaled);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].source, PeerSource::Lan);
        assert_eq!(merged[0].addr, "192.168.1.5:4000".parse().unwrap());
    }

    #[test]
    fn test_distinct_peers_both_kept() {
        let lan = vec![peer("aa11", PeerSource::Lan, "192.168.1.5:4000")];
        let signaled = vec![peer("bb22", PeerSource::Signaling, "203.0.113.5:4000")];
        let merged = merge_peers(lan, signaled);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_duplicate_suppression_within_source() {
        let lan = vec![
            peer("aa11", PeerSource::Lan, "192.168.1.5:4000"),
            peer("aa11", PeerSource::Lan, "192.168.1.6:4000"),
        ];
        let merged = merge_peers(lan, vec![]);
        assert_eq!(merged.len(), 1);
    }
}
