//! tether-server: WebRTC signaling relay.
//!
//! Authenticates clients with an RSA challenge-response handshake, relays
//! session negotiation between them, and streams registry snapshots to
//! monitor connections.

mod config;
mod handshake;
mod observer;
mod registry;
mod router;
mod server;
mod store;
mod transport;

use clap::Parser;
use config::ServerConfig;
use server::TetherServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// tether-server — WebRTC signaling relay
#[derive(Parser, Debug)]
#[command(name = "tether-server", version, about = "WebRTC signaling relay")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.tether/server.toml")]
    config: String,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config_path = PathBuf::from(&cli.config);
    let config = match ServerConfig::load(Some(&config_path), cli.bind.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.bind,
        clients = config.clients.len(),
        "starting tether-server"
    );

    let server = Arc::new(TetherServer::new(config));
    let addr = match server.clone().start().await {
        Ok(addr) => addr,
        Err(e) => {
            error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    };
    info!(addr = %addr, "serving");

    shutdown_signal().await;
    info!("received shutdown signal");
    server.shutdown();

    info!("tether-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
