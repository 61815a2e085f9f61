use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use game_relay::{server, Config, Relay};

/// WebSocket relay for browser game clients.
#[derive(Parser, Debug)]
#[command(name = "game-relay", version, about)]
struct Cli {
    /// Config file (TOML). Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listening port, overrides the config file.
    #[arg(short, long)]
    port: Option<u16>,

    /// Listening address, overrides the config file.
    #[arg(long)]
    bind: Option<IpAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = Config::load_or_default(cli.config.as_deref())?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind = bind;
    }

    let addr = config.listen_addr();
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to listen on {addr}"))?;
    info!(
        "Proxy listening on {addr} with {} static relays",
        config.relays.len()
    );

    let relay = Arc::new(Relay::new(config)?);
    server::serve(listener, relay, shutdown_signal()).await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
