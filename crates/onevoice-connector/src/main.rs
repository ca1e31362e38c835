//! onevoice - exactly one active voice on a shared broadcast channel.
//!
//! Boots the supervisor against the configured channel transport and serves
//! the status page. The production channel driver (a headless-browser
//! scraper for the chat log) lives out of tree and plugs in through
//! [`onevoice_connector::channel::ChannelTransport`]; this binary wires up
//! the in-memory loopback channel for local runs and development.

use std::path::PathBuf;

use clap::Parser;
use tokio::sync::mpsc;

use onevoice_connector::channel::loopback::LoopbackChannel;
use onevoice_connector::config::Config;
use onevoice_connector::status::{StatusHandle, StatusServer};
use onevoice_connector::supervisor::{Supervisor, SupervisorConfig};

#[derive(Debug, Parser)]
#[command(name = "onevoice", about = "Hot-spare chat bot coordinator")]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the status server bind address.
    #[arg(long)]
    status_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(addr) = args.status_addr {
        config.status.bind_addr = addr;
    }

    let status = StatusHandle::new();
    let (refresh_tx, refresh_rx) = mpsc::channel(1);

    let server = StatusServer::new(config.status.bind_addr.clone(), status.clone(), refresh_tx);
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!(error = %e, "status server failed");
        }
    });

    let channel = LoopbackChannel::new();
    let supervisor = Supervisor::new(
        config,
        SupervisorConfig::default(),
        channel.transport(),
        status,
        refresh_rx,
    );
    supervisor.run().await;
    Ok(())
}
