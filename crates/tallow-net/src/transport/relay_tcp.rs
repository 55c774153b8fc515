//! TLS TCP channel through the relay (last resort in the fallback chain)
//!
//! After the short room-binding exchange the relay pumps opaque bytes, so
//! this channel runs the same frame codec as the direct transports; the
//! relay sees none of it in the clear.

use crate::relay::proto::{read_message, write_message, RelayRequest, RelayResponse};
use crate::transport::backpressure::Watermark;
use crate::transport::bandwidth::{BandwidthMonitor, LinkStats};
use crate::transport::{tls, PeerChannel};
use crate::{NetworkError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use rustls::pki_types::ServerName;
use std::sync::Arc;
use tallow_protocol::wire::{Frame, FrameCodec};
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, info, warn};

/// Role when binding to a relay room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayRole {
    /// Create the room and wait for the peer
    Create,
    /// Join an existing room
    Join,
}

/// How the relay's certificate is trusted
#[derive(Debug, Clone)]
pub enum RelayTrust {
    /// Standard webpki validation (relay has a real certificate)
    WebPki,
    /// Pin the relay's self-signed certificate by BLAKE3 fingerprint
    Pinned([u8; 32]),
}

/// A TLS relay channel
pub struct RelayChannel {
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    reader: FramedRead<ReadHalf<TlsStream<TcpStream>>, FrameCodec>,
    watermark: Watermark,
    monitor: BandwidthMonitor,
    encoder: FrameCodec,
    remote: String,
}

impl RelayChannel {
    /// Connect to the relay, bind to the room, and wait until both peers
    /// are present
    pub async fn connect(
        relay_addr: &str,
        server_name: &str,
        trust: RelayTrust,
        code_hash: [u8; 32],
        role: RelayRole,
    ) -> Result<Self> {
        let tcp = TcpStream::connect(relay_addr)
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("relay tcp: {}", e)))?;
        tcp.set_nodelay(true)?;

        let config = match trust {
            RelayTrust::WebPki => tls::client_webpki(),
            RelayTrust::Pinned(fp) => tls::client_pinned(fp),
        };
        let connector = TlsConnector::from(Arc::new(config));
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| NetworkError::Tls(format!("server name: {}", e)))?;
        let mut stream = connector
            .connect(name, tcp)
            .await
            .map_err(|e| NetworkError::Tls(format!("relay handshake: {}", e)))?;

        let request = match role {
            RelayRole::Create => RelayRequest::CreateRoom { code_hash },
            RelayRole::Join => RelayRequest::JoinRoom { code_hash },
        };
        write_message(&mut stream, &request).await?;

        match read_message::<_, RelayResponse>(&mut stream).await? {
            RelayResponse::Joined => {
                info!("joined relay room");
            }
            RelayResponse::RoomCreated => {
                debug!("relay room created; waiting for peer");
                match read_message::<_, RelayResponse>(&mut stream).await? {
                    RelayResponse::PeerJoined => info!("peer joined relay room"),
                    RelayResponse::Error { message } => {
                        return Err(NetworkError::Relay(message))
                    }
                    other => {
                        return Err(NetworkError::Relay(format!(
                            "unexpected relay response {:?}",
                            other
                        )))
                    }
                }
            }
            RelayResponse::Redirect { addr } => {
                return Err(NetworkError::RelayRedirect(addr));
            }
            RelayResponse::Error { message } => {
                return Err(NetworkError::Relay(message));
            }
            RelayResponse::PeerJoined => {
                return Err(NetworkError::Relay(
                    "peer-joined before room binding".into(),
                ));
            }
        }

        Ok(Self::from_stream(stream, relay_addr.to_string()))
    }

    fn from_stream(stream: TlsStream<TcpStream>, remote: String) -> Self {
        let (read_half, mut write_half): (_, WriteHalf<TlsStream<TcpStream>>) =
            tokio::io::split(stream);

        let watermark = Watermark::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let drain_watermark = watermark.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let len = bytes.len();
                if let Err(e) = write_half.write_all(&bytes).await {
                    warn!("relay write failed: {}", e);
                    drain_watermark.release(len);
                    break;
                }
                drain_watermark.release(len);
            }
            let _ = write_half.shutdown().await;
        });

        Self {
            outbound: Some(tx),
            reader: FramedRead::new(read_half, FrameCodec::new()),
            watermark,
            monitor: BandwidthMonitor::new(),
            encoder: FrameCodec::new(),
            remote,
        }
    }
}

impl PeerChannel for RelayChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let mut buf = BytesMut::new();
        self.encoder.encode(frame, &mut buf)?;
        let bytes = buf.freeze();
        self.watermark.reserve(bytes.len()).await;
        self.monitor.record_bytes(bytes.len() as u64);
        self.outbound
            .as_ref()
            .ok_or(NetworkError::ChannelClosed)?
            .send(bytes)
            .map_err(|_| NetworkError::ChannelClosed)?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<Frame>> {
        match self.reader.next().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    fn stats(&self) -> LinkStats {
        self.monitor.stats()
    }

    async fn close(&mut self) {
        debug!("closing relay channel to {}", self.remote);
        // Dropping the queue sender ends the writer task, which drains the
        // queue and shuts the TLS write half down
        self.outbound.take();
    }

    fn description(&self) -> String {
        format!("relay ({})", self.remote)
    }
}
