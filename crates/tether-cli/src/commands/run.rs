//! `tether run` — supervised relay connection.
//!
//! Connects with the configured identity, logs relayed signaling, and
//! reconnects with backoff until interrupted.

use anyhow::{Context, Result};
use std::sync::Arc;
use tether_client::{ClientConfig, LogHandler, Supervisor};
use tracing::info;

pub async fn run(config_path: &str) -> Result<()> {
    let path = super::expand_tilde(config_path);
    let config = ClientConfig::load(&path)
        .map_err(|e| anyhow::anyhow!("{e}"))
        .with_context(|| format!("failed to load config {}", path.display()))?;
    let private_key_pem = config
        .private_key_pem()
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("failed to load private key")?;

    info!(id = %config.client.id, url = %config.server.url, "starting supervised connection");

    let supervisor = Arc::new(
        Supervisor::new(config, &private_key_pem, Arc::new(LogHandler))
            .map_err(|e| anyhow::anyhow!("{e}"))?,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = {
        let supervisor = supervisor.clone();
        tokio::spawn(async move { supervisor.run(shutdown_rx).await })
    };

    shutdown_signal().await;
    info!("received shutdown signal");
    let _ = shutdown_tx.send(true);
    let _ = runner.await;

    Ok(())
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
