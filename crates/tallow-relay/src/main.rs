//! Tallow relay server binary

#![forbid(unsafe_code)]

use clap::Parser;
use tallow_relay::config::{parse_duration, RelayConfig};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tallow-relay")]
#[command(version, about = "Zero-knowledge relay server for Tallow transfers")]
struct Cli {
    /// Listen port
    #[arg(long, default_value_t = 4433)]
    port: u16,

    /// Maximum concurrent rooms
    #[arg(long, default_value_t = 5000)]
    max_rooms: usize,

    /// Per-room relayed-byte cap
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    max_bytes_per_room: u64,

    /// Room time-to-live (e.g. 30m, 24h)
    #[arg(long, default_value = "24h", value_parser = parse_duration)]
    ttl: std::time::Duration,

    /// This node's shard index when running a sharded deployment
    #[arg(long, default_value_t = 0)]
    shard_index: usize,

    /// Comma-separated shard addresses, index-aligned
    #[arg(long, value_delimiter = ',')]
    shards: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = RelayConfig {
        port: cli.port,
        max_rooms: cli.max_rooms,
        max_bytes_per_room: cli.max_bytes_per_room,
        ttl: cli.ttl,
        shard_index: cli.shard_index,
        shards: cli.shards,
        ..Default::default()
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("sigterm handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        info!("shutdown signal received");
        signal_token.cancel();
    });

    tallow_relay::serve(config, shutdown).await
}
