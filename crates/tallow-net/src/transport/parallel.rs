//! Parallel channel set
//!
//! Up to four channels move chunks for one transfer, distributed
//! round-robin. Each channel keeps its own backpressure through its
//! bounded outbound queue; inbound frames merge into a single stream and
//! the receiver reorders by chunk index. No cross-channel ordering is
//! promised.

use crate::transport::bandwidth::LinkStats;
use crate::transport::{Channel, PeerChannel};
use crate::{NetworkError, Result};
use tallow_protocol::wire::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Maximum channels per transfer
pub const MAX_CHANNELS: usize = 4;

/// Per-channel outbound queue depth (frames)
const OUTBOUND_DEPTH: usize = 32;

struct Worker {
    outbound: mpsc::Sender<Frame>,
    handle: JoinHandle<()>,
    description: String,
}

/// A set of channels behaving as one
pub struct ParallelChannels {
    workers: Vec<Worker>,
    inbound: mpsc::Receiver<Result<Frame>>,
    next: usize,
}

impl ParallelChannels {
    /// Take ownership of up to [`MAX_CHANNELS`] channels
    pub fn new(channels: Vec<Channel>) -> Result<Self> {
        if channels.is_empty() {
            return Err(NetworkError::ConnectionFailed(
                "parallel set needs at least one channel".into(),
            ));
        }
        let channels: Vec<Channel> = channels.into_iter().take(MAX_CHANNELS).collect();

        let (inbound_tx, inbound_rx) = mpsc::channel(OUTBOUND_DEPTH * MAX_CHANNELS);
        let mut workers = Vec::with_capacity(channels.len());

        for mut channel in channels {
            let description = channel.description();
            let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_DEPTH);
            let inbound = inbound_tx.clone();
            let label = description.clone();

            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        frame = outbound_rx.recv() => {
                            match frame {
                                Some(frame) => {
                                    if let Err(e) = channel.send(frame).await {
                                        warn!("{}: send failed: {}", label, e);
                                        let _ = inbound.send(Err(e)).await;
                                        break;
                                    }
                                }
                                None => {
                                    channel.close().await;
                                    break;
                                }
                            }
                        }
                        received = channel.recv() => {
                            match received {
                                Ok(Some(frame)) => {
                                    if inbound.send(Ok(frame)).await.is_err() {
                                        break;
                                    }
                                }
                                Ok(None) => {
                                    debug!("{}: peer closed", label);
                                    break;
                                }
                                Err(e) => {
                                    let _ = inbound.send(Err(e)).await;
                                    break;
                                }
                            }
                        }
                    }
                }
            });

            workers.push(Worker {
                outbound: outbound_tx,
                handle,
                description,
            });
        }

        Ok(Self {
            workers,
            inbound: inbound_rx,
            next: 0,
        })
    }

    /// Number of live channels
    pub fn channel_count(&self) -> usize {
        self.workers.len()
    }

    /// Send a frame on the next channel in round-robin order
    ///
    /// Suspends when that channel's queue is full - per-channel
    /// backpressure, independent of its siblings.
    pub async fn send(&mut self, frame: Frame) -> Result<()> {
        let start = self.next;
        // Prefer the round-robin choice, but skip channels that died
        for offset in 0..self.workers.len() {
            let i = (start + offset) % self.workers.len();
            if self.workers[i].outbound.is_closed() {
                continue;
            }
            self.next = (i + 1) % self.workers.len();
            return self.workers[i]
                .outbound
                .send(frame)
                .await
                .map_err(|_| NetworkError::ChannelClosed);
        }
        Err(NetworkError::ChannelClosed)
    }

    /// Next frame from any channel, in arrival order
    pub async fn recv(&mut self) -> Result<Option<Frame>> {
        match self.inbound.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Close every channel and wait for the workers
    pub async fn close(&mut self) {
        for worker in &self.workers {
            debug!("closing {}", worker.description);
        }
        let workers = std::mem::take(&mut self.workers);
        for worker in workers {
            drop(worker.outbound);
            let _ = worker.handle.await;
        }
    }

    /// Placeholder stats: aggregate reporting comes from the owning
    /// session's monitor, which samples the underlying channels
    pub fn stats(&self) -> LinkStats {
        LinkStats::default()
    }
}
