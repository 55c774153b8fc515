//! Transport channels
//!
//! One trait, three variants: QUIC, hole-punched UDP datagrams, and TLS
//! TCP through the relay. The transfer pipeline only ever sees
//! [`PeerChannel`]; the selector in [`fallback`] decides which variant a
//! session actually runs on.

pub mod backpressure;
pub mod bandwidth;
pub mod datagram;
pub mod fallback;
pub mod parallel;
pub mod quic;
pub mod relay_tcp;
pub mod tls;

pub use backpressure::{Watermark, HIGH_WATER, LOW_WATER};
pub use bandwidth::{BandwidthMonitor, LinkStats};
pub use fallback::{connect_with_fallback, FallbackPlan};
pub use parallel::ParallelChannels;

use crate::Result;
use tallow_protocol::wire::Frame;

/// Session idle timeout: channels with no traffic for this long close
pub const IDLE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5 * 60);

/// A connected channel to the peer
///
/// `send` suspends on backpressure when the channel's buffered bytes pass
/// the high watermark and resumes below the low watermark; it never
/// busy-polls. `recv` returns frames in arrival order, which for
/// datagram-based channels may differ from chunk-index order.
#[allow(async_fn_in_trait)]
pub trait PeerChannel: Send {
    /// Enqueue a frame, suspending while the channel is over its high
    /// watermark
    async fn send(&mut self, frame: Frame) -> Result<()>;

    /// Next frame in arrival order; `None` when the peer closed cleanly
    async fn recv(&mut self) -> Result<Option<Frame>>;

    /// Current link statistics
    fn stats(&self) -> LinkStats;

    /// Close the channel, flushing queued frames where the transport
    /// allows it
    async fn close(&mut self);

    /// Human-readable description for logging
    fn description(&self) -> String;
}

/// The closed set of channel implementations
pub enum Channel {
    /// QUIC bi-directional stream
    Quic(quic::QuicChannel),
    /// Hole-punched unreliable datagrams
    Datagram(datagram::DatagramChannel),
    /// TLS TCP through the relay
    Relay(relay_tcp::RelayChannel),
}

impl PeerChannel for Channel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        match self {
            Channel::Quic(c) => c.send(frame).await,
            Channel::Datagram(c) => c.send(frame).await,
            Channel::Relay(c) => c.send(frame).await,
        }
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        match self {
            Channel::Quic(c) => c.recv().await,
            Channel::Datagram(c) => c.recv().await,
            Channel::Relay(c) => c.recv().await,
        }
    }

    fn stats(&self) -> LinkStats {
        match self {
            Channel::Quic(c) => c.stats(),
            Channel::Datagram(c) => c.stats(),
            Channel::Relay(c) => c.stats(),
        }
    }

    async fn close(&mut self) {
        match self {
            Channel::Quic(c) => c.close().await,
            Channel::Datagram(c) => c.close().await,
            Channel::Relay(c) => c.close().await,
        }
    }

    fn description(&self) -> String {
        match self {
            Channel::Quic(c) => c.description(),
            Channel::Datagram(c) => c.description(),
            Channel::Relay(c) => c.description(),
        }
    }
}
