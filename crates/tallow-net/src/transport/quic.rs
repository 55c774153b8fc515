//! QUIC channel (first choice in the fallback chain)
//!
//! One bidirectional stream per session carries the frame codec; quinn's
//! own congestion control sits under our watermark accounting, which
//! bounds how far the application may run ahead of the wire.

use crate::transport::backpressure::Watermark;
use crate::transport::bandwidth::{BandwidthMonitor, LinkStats};
use crate::transport::{tls, PeerChannel};
use crate::{NetworkError, Result};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use quinn::crypto::rustls::{QuicClientConfig, QuicServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tallow_protocol::wire::{Frame, FrameCodec};
use tokio::sync::mpsc;
use tokio_util::codec::{Encoder, FramedRead};
use tracing::{debug, warn};

/// Build a QUIC server endpoint with a self-signed certificate
///
/// Returns the endpoint and the certificate DER for fingerprint pinning
/// by the connecting peer.
pub fn server_endpoint(bind: SocketAddr) -> Result<(quinn::Endpoint, Vec<u8>)> {
    let (tls_config, cert_der) = tls::self_signed_server()?;
    let quic_config = QuicServerConfig::try_from(tls_config)
        .map_err(|e| NetworkError::Tls(format!("quic server config: {}", e)))?;
    let server_config = quinn::ServerConfig::with_crypto(Arc::new(quic_config));
    let endpoint = quinn::Endpoint::server(server_config, bind)?;
    Ok((endpoint, cert_der))
}

/// A listening QUIC endpoint with its self-signed identity
///
/// Wraps the endpoint and certificate so callers outside this crate can
/// advertise the pin and accept sessions without touching quinn types.
pub struct QuicListener {
    endpoint: quinn::Endpoint,
    cert_der: Vec<u8>,
}

impl QuicListener {
    /// Bind a listener with a fresh self-signed certificate
    pub fn bind(addr: SocketAddr) -> Result<Self> {
        let (endpoint, cert_der) = server_endpoint(addr)?;
        Ok(Self { endpoint, cert_der })
    }

    /// The bound port
    pub fn local_port(&self) -> Option<u16> {
        self.endpoint.local_addr().ok().map(|addr| addr.port())
    }

    /// BLAKE3 fingerprint of the certificate, for peers to pin
    pub fn cert_fingerprint(&self) -> [u8; 32] {
        tls::cert_fingerprint(&self.cert_der)
    }

    /// Accept one inbound session
    pub async fn accept(&self) -> Result<QuicChannel> {
        QuicChannel::accept(&self.endpoint).await
    }
}

/// Build a QUIC client endpoint pinned to the peer's certificate
pub fn client_endpoint(bind: SocketAddr, pin: [u8; 32]) -> Result<(quinn::Endpoint, quinn::ClientConfig)> {
    let endpoint = quinn::Endpoint::client(bind)?;
    let tls_config = tls::client_pinned(pin);
    let quic_config = QuicClientConfig::try_from(tls_config)
        .map_err(|e| NetworkError::Tls(format!("quic client config: {}", e)))?;
    let client_config = quinn::ClientConfig::new(Arc::new(quic_config));
    Ok((endpoint, client_config))
}

/// A QUIC peer channel over one bidirectional stream
pub struct QuicChannel {
    connection: quinn::Connection,
    outbound: mpsc::UnboundedSender<Bytes>,
    reader: FramedRead<quinn::RecvStream, FrameCodec>,
    watermark: Watermark,
    monitor: BandwidthMonitor,
    encoder: FrameCodec,
    remote: SocketAddr,
}

impl QuicChannel {
    /// Connect to a listening peer and open the session stream
    pub async fn connect(
        endpoint: &quinn::Endpoint,
        config: quinn::ClientConfig,
        remote: SocketAddr,
    ) -> Result<Self> {
        let connection = endpoint
            .connect_with(config, remote, "tallow-relay")
            .map_err(|e| NetworkError::ConnectionFailed(format!("quic connect: {}", e)))?
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("quic handshake: {}", e)))?;
        let (send, recv) = connection
            .open_bi()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("quic stream: {}", e)))?;
        Ok(Self::from_parts(connection, send, recv, remote))
    }

    /// Accept one inbound connection and its session stream
    pub async fn accept(endpoint: &quinn::Endpoint) -> Result<Self> {
        let incoming = endpoint
            .accept()
            .await
            .ok_or(NetworkError::ChannelClosed)?;
        let connection = incoming
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("quic accept: {}", e)))?;
        let remote = connection.remote_address();
        let (send, recv) = connection
            .accept_bi()
            .await
            .map_err(|e| NetworkError::ConnectionFailed(format!("quic stream: {}", e)))?;
        Ok(Self::from_parts(connection, send, recv, remote))
    }

    fn from_parts(
        connection: quinn::Connection,
        mut send: quinn::SendStream,
        recv: quinn::RecvStream,
        remote: SocketAddr,
    ) -> Self {
        let watermark = Watermark::new();
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

        // Writer task: drains the queue and credits the watermark once
        // bytes have actually entered quinn's send buffer
        let drain_watermark = watermark.clone();
        tokio::spawn(async move {
            while let Some(bytes) = rx.recv().await {
                let len = bytes.len();
                if let Err(e) = send.write_all(&bytes).await {
                    warn!("quic write failed: {}", e);
                    drain_watermark.release(len);
                    break;
                }
                drain_watermark.release(len);
            }
            let _ = send.finish();
        });

        Self {
            connection,
            outbound: tx,
            reader: FramedRead::new(recv, FrameCodec::new()),
            watermark,
            monitor: BandwidthMonitor::new(),
            encoder: FrameCodec::new(),
            remote,
        }
    }
}

impl PeerChannel for QuicChannel {
    async fn send(&mut self, frame: Frame) -> Result<()> {
        let mut buf = BytesMut::new();
        self.encoder.encode(frame, &mut buf)?;
        let bytes = buf.freeze();
        self.watermark.reserve(bytes.len()).await;
        self.monitor.record_bytes(bytes.len() as u64);
        self.monitor.record_rtt(self.connection.rtt());
        self.outbound
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
        let quinn_stats = self.connection.stats();
        let lost = quinn_stats.path.lost_packets;
        let sent = quinn_stats.path.sent_packets.max(1);
        LinkStats {
            rtt_ms: self.connection.rtt().as_secs_f64() * 1000.0,
            loss: lost as f64 / sent as f64,
            throughput_bps: self.monitor.stats().throughput_bps,
        }
    }

    async fn close(&mut self) {
        debug!("closing quic channel to {}", self.remote);
        self.connection.close(0u32.into(), b"done");
    }

    fn description(&self) -> String {
        format!("quic ({})", self.remote)
    }
}
