//! Tallow CLI - secure P2P file transfer

#![forbid(unsafe_code)]

mod cli;
mod commands;
mod exit_codes;
mod logging;

use clap::Parser;
use cli::Cli;
use owo_colors::OwoColorize;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    if let Err(e) = tallow_crypto::init() {
        tracing::warn!("crypto hardening unavailable: {}", e);
    }

    let result = match cli.command {
        cli::Commands::Send(args) => commands::send::execute(args).await,
        cli::Commands::Receive(args) => commands::receive::execute(args).await,
        cli::Commands::Relay(args) => commands::relay_cmd::execute(args).await,
    };

    match result {
        Ok(()) => std::process::exit(exit_codes::SUCCESS),
        Err(e) => {
            eprintln!("{} {}", "error:".bold().red(), e);
            std::process::exit(e.exit_code());
        }
    }
}
