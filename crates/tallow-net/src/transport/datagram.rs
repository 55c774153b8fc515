//! Hole-punched UDP datagram channel
//!
//! Unreliable and unordered by design: retransmission lives at the
//! application layer (bitmap plus resend requests). Frames larger than
//! one datagram are fragmented; a frame is delivered only when every
//! fragment arrives, otherwise it ages out of the reassembly buffer and
//! the app-level resend covers it.
//!
//! Datagram layout:
//!
//! ```text
//! [1 byte kind: 0 probe, 1 probe-ack, 2 data]
//! probe/probe-ack: [16 byte punch token]
//! data:            [4 byte frame id][2 byte frag index][2 byte frag count][payload]
//! ```

use crate::transport::backpressure::Watermark;
use crate::transport::bandwidth::{BandwidthMonitor, LinkStats};
use crate::transport::PeerChannel;
use crate::{NetworkError, Result};
use bytes::BytesMut;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tallow_protocol::wire::{Frame, FrameCodec};
use tokio::net::UdpSocket;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

const KIND_PROBE: u8 = 0;
const KIND_PROBE_ACK: u8 = 1;
const KIND_DATA: u8 = 2;

/// Conservative payload budget per datagram (below common MTUs)
const FRAGMENT_PAYLOAD: usize = 1200;

/// Data fragment header length
const DATA_HEADER: usize = 1 + 4 + 2 + 2;

/// Incomplete frames older than this are discarded
const REASSEMBLY_TTL: Duration = Duration::from_secs(10);

/// Interval between punch probes
const PUNCH_INTERVAL: Duration = Duration::from_millis(200);

struct Partial {
    fragments: Vec<Option<Vec<u8>>>,
    received: usize,
    started_at: Instant,
}

/// An established hole-punched datagram channel
pub struct DatagramChannel {
    socket: Arc<UdpSocket>,
    peer: SocketAddr,
    next_frame_id: u32,
    reassembly: HashMap<u32, Partial>,
    watermark: Watermark,
    monitor: BandwidthMonitor,
    codec: FrameCodec,
    recv_buf: Vec<u8>,
    closed: bool,
}

/// Punch a path to the peer by racing probes at every candidate
///
/// Both sides use the same token (derived from the room rendezvous).
/// The first address that answers a probe wins; the function then
/// returns an established channel bound to that address.
///
/// An empty candidate list is passive mode: no probes go out, but
/// inbound probes with the right token are answered and establish the
/// channel - the shape a waiting sender uses while the receiver races
/// its candidate list.
pub async fn punch(
    socket: Arc<UdpSocket>,
    candidates: &[SocketAddr],
    token: [u8; 16],
    timeout: Duration,
) -> Result<DatagramChannel> {
    let mut probe = Vec::with_capacity(17);
    probe.push(KIND_PROBE);
    probe.extend_from_slice(&token);
    let mut ack = Vec::with_capacity(17);
    ack.push(KIND_PROBE_ACK);
    ack.extend_from_slice(&token);

    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; 64];
    let mut probe_timer = tokio::time::interval(PUNCH_INTERVAL);

    loop {
        tokio::select! {
            _ = probe_timer.tick() => {
                if Instant::now() >= deadline {
                    return Err(NetworkError::Timeout("hole punch"));
                }
                // Passive mode sends nothing and only answers
                for candidate in candidates {
                    let _ = socket.send_to(&probe, candidate).await;
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                if len < 17 || buf[1..17] != token {
                    trace!("ignoring stray datagram from {}", from);
                    continue;
                }
                match buf[0] {
                    KIND_PROBE => {
                        // Answer and treat the path as established; the
                        // peer locks on when our ack (or data) arrives
                        let _ = socket.send_to(&ack, from).await;
                        debug!("hole punch: probed by {}", from);
                        return Ok(DatagramChannel::established(socket, from));
                    }
                    KIND_PROBE_ACK => {
                        debug!("hole punch: ack from {}", from);
                        return Ok(DatagramChannel::established(socket, from));
                    }
                    _ => continue,
                }
            }
        }
    }
}

impl DatagramChannel {
    /// Wrap an already-punched socket/peer pair
    pub fn established(socket: Arc<UdpSocket>, peer: SocketAddr) -> Self {
        Self {
            socket,
            peer,
            next_frame_id: 0,
            reassembly: HashMap::new(),
            watermark: Watermark::new(),
            monitor: BandwidthMonitor::new(),
            codec: FrameCodec::new(),
            recv_buf: vec![0u8; FRAGMENT_PAYLOAD + DATA_HEADER + 64],
            closed: false,
        }
    }

    fn gc_reassembly(&mut self, now: Instant) {
        self.reassembly
            .retain(|_, partial| now.duration_since(partial.started_at) < REASSEMBLY_TTL);
    }

    /// Feed one data datagram into reassembly; returns a complete frame's
    /// bytes when the last fragment lands
    fn accept_fragment(&mut self, datagram: &[u8]) -> Option<Vec<u8>> {
        if datagram.len() < DATA_HEADER {
            return None;
        }
        let frame_id = u32::from_be_bytes(datagram[1..5].try_into().expect("4 bytes"));
        let index = u16::from_be_bytes(datagram[5..7].try_into().expect("2 bytes")) as usize;
        let count = u16::from_be_bytes(datagram[7..9].try_into().expect("2 bytes")) as usize;
        if count == 0 || index >= count {
            warn!("malformed fragment header from {}", self.peer);
            return None;
        }
        let payload = datagram[DATA_HEADER..].to_vec();

        let partial = self.reassembly.entry(frame_id).or_insert_with(|| Partial {
            fragments: vec![None; count],
            received: 0,
            started_at: Instant::now(),
        });
        if partial.fragments.len() != count {
            // Conflicting fragment counts: drop the stale entry
            *partial = Partial {
                fragments: vec![None; count],
                received: 0,
                started_at: Instant::now(),
            };
        }
        if partial.fragments[index].is_none() {
            partial.fragments[index] = Some(payload);
            partial.received += 1;
        }
        if partial.received == count {
            let partial = self.reassembly.remove(&frame_id).expect("just inserted");
            let mut whole = Vec::new();
            for fragment in partial.fragments {
                whole.extend_from_slice(&fragment.expect("all fragments received"));
            }
            Some(whole)
        } else {
            None
        }
    }
}

impl PeerChannel for DatagramChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        if self.closed {
            return Err(NetworkError::ChannelClosed);
        }
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf)?;
        let bytes = buf.freeze();

        self.watermark.reserve(bytes.len()).await;
        let frame_id = self.next_frame_id;
        self.next_frame_id = self.next_frame_id.wrapping_add(1);

        let count = bytes.len().div_ceil(FRAGMENT_PAYLOAD).max(1);
        if count > u16::MAX as usize {
            self.watermark.release(bytes.len());
            return Err(NetworkError::ConnectionFailed(
                "frame too large for datagram fragmentation".into(),
            ));
        }

        let mut datagram = Vec::with_capacity(DATA_HEADER + FRAGMENT_PAYLOAD);
        for (index, piece) in bytes.chunks(FRAGMENT_PAYLOAD).enumerate() {
            datagram.clear();
            datagram.push(KIND_DATA);
            datagram.extend_from_slice(&frame_id.to_be_bytes());
            datagram.extend_from_slice(&(index as u16).to_be_bytes());
            datagram.extend_from_slice(&(count as u16).to_be_bytes());
            datagram.extend_from_slice(piece);
            self.socket.send_to(&datagram, self.peer).await?;
        }

        self.monitor.record_bytes(bytes.len() as u64);
        self.monitor.record_frames(1, 0);
        self.watermark.release(bytes.len());
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        if self.closed {
            return Ok(None);
        }
        loop {
            self.gc_reassembly(Instant::now());
            let (len, from) = {
                let mut buf = std::mem::take(&mut self.recv_buf);
                let result = self.socket.recv_from(&mut buf).await;
                self.recv_buf = buf;
                result?
            };
            if from != self.peer {
                trace!("dropping datagram from non-peer {}", from);
                continue;
            }
            let datagram = self.recv_buf[..len].to_vec();
            match datagram.first() {
                Some(&KIND_DATA) => {
                    if let Some(whole) = self.accept_fragment(&datagram) {
                        let mut buf = BytesMut::from(whole.as_slice());
                        match self.codec.decode(&mut buf)? {
                            Some(frame) => return Ok(Some(frame)),
                            None => {
                                warn!("reassembled frame was incomplete; dropping");
                                continue;
                            }
                        }
                    }
                }
                Some(&KIND_PROBE) | Some(&KIND_PROBE_ACK) => {
                    // Late punch traffic, harmless
                    continue;
                }
                _ => continue,
            }
        }
    }

    fn stats(&self) -> LinkStats {
        self.monitor.stats()
    }

    async fn close(&mut self) {
        self.closed = true;
        self.reassembly.clear();
    }

    fn description(&self) -> String {
        format!("p2p datagram ({})", self.peer)
    }
}
