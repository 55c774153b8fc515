//! CLI argument parsing

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tallow")]
#[command(author, version, about = "Secure P2P file transfer", long_about = None)]
pub struct Cli {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Send a file to a peer
    Send(SendArgs),

    /// Receive a file with a room code
    Receive(ReceiveArgs),

    /// Run the relay server
    Relay(RelayArgs),
}

#[derive(Args)]
pub struct SendArgs {
    /// File to send
    pub file: PathBuf,

    /// Relay server address (host:port)
    #[arg(long, env = "RELAY_URL")]
    pub relay: Option<String>,

    /// Use a specific room code instead of generating one
    #[arg(long)]
    pub code: Option<String>,

    /// Shared password strengthening the room code
    #[arg(long, env = "TALLOW_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Args)]
pub struct ReceiveArgs {
    /// Room code from the sender
    pub code: String,

    /// Relay server address (host:port)
    #[arg(long, env = "RELAY_URL")]
    pub relay: Option<String>,

    /// Shared password strengthening the room code
    #[arg(long, env = "TALLOW_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Output directory or file path
    #[arg(long)]
    pub out: Option<PathBuf>,
}

#[derive(Args)]
pub struct RelayArgs {
    /// Listen port
    #[arg(long, default_value_t = 4433)]
    pub port: u16,

    /// Maximum concurrent rooms
    #[arg(long, default_value_t = 5000)]
    pub max_rooms: usize,

    /// Per-room relayed-byte cap
    #[arg(long, default_value_t = 10 * 1024 * 1024 * 1024)]
    pub max_bytes_per_room: u64,

    /// Room time-to-live (e.g. 30m, 24h)
    #[arg(long, default_value = "24h", value_parser = tallow_relay::config::parse_duration)]
    pub ttl: std::time::Duration,
}
