//! LAN discovery and peer-list merging

pub mod mdns;
pub mod merge;

pub use mdns::{browse, discover_sender, Advertisement, LanAdvertiser, SenderContact, SERVICE_TYPE};
pub use merge::{merge_peers, DiscoveredPeer, PeerSource};
