//! Relay command: run the relay server in-process

use super::CliError;
use crate::cli::RelayArgs;
use tallow_relay::RelayConfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Execute the relay command; returns when the server drains out
pub async fn execute(args: RelayArgs) -> Result<(), CliError> {
    let config = RelayConfig {
        port: args.port,
        max_rooms: args.max_rooms,
        max_bytes_per_room: args.max_bytes_per_room,
        ttl: args.ttl,
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

    tallow_relay::serve(config, shutdown)
        .await
        .map_err(|e| CliError::Transport(format!("relay: {}", e)))
}
