//! Core server: accepts connections, drives the admission handshake, and
//! runs per-connection session loops.
//!
//! Signal connections authenticate, register, then relay through the
//! router until the socket closes, a newer connection takes over their
//! id, or the server shuts down. Monitor connections skip authentication
//! and receive registry snapshots, starting with the current state.

use crate::config::ServerConfig;
use crate::handshake;
use crate::registry::Registry;
use crate::router::{Caller, Router};
use crate::store::{IdentityStore, StaticStore};
use crate::transport::{self, EndpointKind, WsConnection};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tether_core::{Message, TetherError, TetherResult};
use tokio::sync::{broadcast, mpsc, Notify};
use tracing::{debug, info, warn};

/// Outbound queue depth per signal connection.
const SESSION_QUEUE_DEPTH: usize = 64;

pub struct TetherServer {
    config: ServerConfig,
    store: Arc<StaticStore>,
    registry: Arc<Registry>,
    router: Arc<Router>,
    shutdown_tx: broadcast::Sender<()>,
}

impl TetherServer {
    pub fn new(config: ServerConfig) -> Self {
        let store = Arc::new(StaticStore::from_config(&config));
        let registry = Arc::new(Registry::new());
        let router = Arc::new(Router::new(registry.clone(), store.clone()));
        Self {
            config,
            store,
            registry,
            router,
            shutdown_tx: broadcast::channel(1).0,
        }
    }

    /// Bind the listener and start serving. Returns the bound address.
    pub async fn start(self: Arc<Self>) -> TetherResult<SocketAddr> {
        let (addr, mut conn_rx) = transport::start_listener(
            self.config.bind,
            self.config.signal_path.clone(),
            self.config.monitor_path.clone(),
        )
        .await?;

        let server = self.clone();
        tokio::spawn(async move {
            let mut shutdown = server.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    conn = conn_rx.recv() => {
                        let Some(conn) = conn else { break };
                        let server = server.clone();
                        tokio::spawn(async move {
                            server.handle_connection(conn).await;
                        });
                    }
                    _ = shutdown.recv() => {
                        info!("accept loop stopping");
                        break;
                    }
                }
            }
        });

        Ok(addr)
    }

    /// Tell every session loop and the accept loop to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    async fn handle_connection(&self, conn: WsConnection) {
        let remote = conn.remote_addr;
        match conn.kind {
            EndpointKind::Signal => {
                if let Err(e) = self.handle_signal(conn).await {
                    debug!(remote = %remote, error = %e, "signal connection ended with error");
                }
            }
            EndpointKind::Monitor => self.handle_monitor(conn).await,
        }
    }

    /// Drive one signal connection: handshake, register, relay, cleanup.
    async fn handle_signal(&self, mut conn: WsConnection) -> TetherResult<()> {
        let remote = conn.remote_addr;
        let timeout = Duration::from_secs(self.config.handshake_timeout);
        let client = match tokio::time::timeout(timeout, self.admit(&mut conn)).await {
            Ok(Ok(identity)) => identity,
            Ok(Err(e)) => {
                warn!(remote = %remote, error = %e, "handshake failed");
                let _ = conn.ws.close(None).await;
                return Ok(());
            }
            Err(_) => {
                warn!(remote = %remote, "handshake timed out");
                let _ = conn.ws.close(None).await;
                return Ok(());
            }
        };

        let (outbound_tx, mut outbound_rx) = mpsc::channel(SESSION_QUEUE_DEPTH);
        let superseded = Arc::new(Notify::new());
        let seq = self
            .registry
            .register(&client.id, &client.space_id, outbound_tx.clone(), superseded.clone())
            .await;

        let caller = Caller {
            id: client.id.clone(),
            space_id: client.space_id.clone(),
        };
        let mut shutdown = self.shutdown_tx.subscribe();
        let (mut ws_tx, mut ws_rx) = conn.ws.split();

        loop {
            tokio::select! {
                _ = superseded.notified() => {
                    info!(client = %caller.id, "closing superseded connection");
                    let _ = ws_tx.close().await;
                    break;
                }
                _ = shutdown.recv() => {
                    debug!(client = %caller.id, "closing for shutdown");
                    let _ = ws_tx.close().await;
                    break;
                }
                queued = outbound_rx.recv() => {
                    // Registry holds a sender for the session's lifetime,
                    // so None only happens after unregister.
                    let Some(msg) = queued else { break };
                    if let Err(e) = transport::send_message(&mut ws_tx, &msg).await {
                        debug!(client = %caller.id, error = %e, "send failed, closing");
                        break;
                    }
                }
                incoming = transport::recv_message(&mut ws_rx) => {
                    match incoming {
                        Ok(Some(msg)) => {
                            self.router.dispatch(&caller, &outbound_tx, msg).await;
                        }
                        Ok(None) => {
                            debug!(client = %caller.id, "client closed connection");
                            break;
                        }
                        Err(TetherError::Codec(e)) => {
                            // One bad frame does not kill the session.
                            warn!(client = %caller.id, error = %e, "undecodable frame, ignoring");
                        }
                        Err(e) => {
                            debug!(client = %caller.id, error = %e, "recv failed, closing");
                            break;
                        }
                    }
                }
            }
        }

        self.registry.unregister(&caller.id, seq).await;
        Ok(())
    }

    /// Run the handshake steps against the socket. Success yields the
    /// verified identity.
    async fn admit(&self, conn: &mut WsConnection) -> TetherResult<crate::config::ClientIdentity> {
        let claimed = match transport::recv_message(&mut conn.ws).await? {
            Some(Message::Auth { data }) => data,
            Some(other) => {
                return Err(TetherError::HandshakeFailed(format!(
                    "expected auth, got {}",
                    other.kind()
                )))
            }
            None => return Err(TetherError::HandshakeFailed("closed before auth".into())),
        };

        let Some(identity) = self.store.resolve(&claimed) else {
            return Err(TetherError::HandshakeFailed(format!(
                "unknown client id {claimed:?}"
            )));
        };

        let issued = handshake::issue_challenge(&identity)?;
        transport::send_message(&mut conn.ws, &issued.message).await?;

        let response = transport::recv_message(&mut conn.ws)
            .await?
            .ok_or_else(|| TetherError::HandshakeFailed("closed before response".into()))?;
        if !handshake::verify_response(&response, &issued.plaintext) {
            return Err(TetherError::HandshakeFailed(format!(
                "challenge verification failed for {claimed:?}"
            )));
        }

        Ok(identity)
    }

    /// Drive one monitor connection: initial snapshot, then pushed updates.
    async fn handle_monitor(&self, mut conn: WsConnection) {
        let remote = conn.remote_addr;
        let (observer_id, mut updates) = self.registry.observers().subscribe().await;
        info!(remote = %remote, observer = %observer_id, "monitor connected");

        let (mut ws_tx, mut ws_rx) = conn.ws.split();
        let initial = Message::ClientsInfo {
            data: self.registry.snapshot().await,
        };
        if transport::send_message(&mut ws_tx, &initial).await.is_err() {
            self.registry.observers().unsubscribe(observer_id).await;
            return;
        }

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                update = updates.recv() => {
                    let Some(msg) = update else { break };
                    if transport::send_message(&mut ws_tx, &msg).await.is_err() {
                        break;
                    }
                }
                _ = shutdown.recv() => {
                    let _ = ws_tx.close().await;
                    break;
                }
                // Monitors send nothing meaningful; reading keeps close
                // detection prompt.
                incoming = transport::recv_message(&mut ws_rx) => {
                    match incoming {
                        Ok(Some(msg)) => {
                            debug!(observer = %observer_id, kind = msg.kind(), "ignoring monitor message");
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
            }
        }

        self.registry.observers().unsubscribe(observer_id).await;
        info!(observer = %observer_id, "monitor disconnected");
    }
}
