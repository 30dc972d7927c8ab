//! tether-client: Rust client library for the tether signaling relay.
//!
//! Provides a supervised WebSocket connection that authenticates via RSA
//! challenge-response, heartbeats on an interval, and reconnects with
//! exponential backoff when the link drops.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//! use tether_client::{ClientConfig, LogHandler, Supervisor};
//!
//! # async fn example() -> tether_core::TetherResult<()> {
//! let config = ClientConfig::load(Path::new("client.toml"))?;
//! let private_key_pem = config.private_key_pem()?;
//! let supervisor = Arc::new(Supervisor::new(
//!     config,
//!     &private_key_pem,
//!     Arc::new(LogHandler),
//! )?);
//!
//! let (_shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
//! supervisor.run(shutdown_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod handler;
pub mod supervisor;
pub mod ws;

// Re-export primary public types.
pub use config::{ClientConfig, ClientSection, ServerSection, WebSocketSection};
pub use handler::{LogHandler, SignalHandler};
pub use supervisor::Supervisor;

// Re-export tether-core error types for convenience.
pub use tether_core::{TetherError, TetherResult};
