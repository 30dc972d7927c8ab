//! Connection supervisor: owns the relay socket and keeps it alive.
//!
//! One supervisor manages at most one live connection. `connect` is
//! single-flight: a second caller while an attempt is in progress gets an
//! error instead of a second socket. Every connection gets an
//! `AttemptGuard` whose teardown runs exactly once no matter how many of
//! the read, write, and heartbeat tasks notice the failure first.
//!
//! `run` wraps `connect` in a retry loop with exponential backoff and
//! jitter, so a relay restart does not produce a reconnect stampede.

use crate::auth;
use crate::config::ClientConfig;
use crate::handler::SignalHandler;
use crate::ws;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tether_core::crypto::{self, RsaPrivateKey};
use tether_core::{unix_ms, IceCandidate, Message, PingData, TetherError, TetherResult};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

/// Outbound queue depth for one connection.
const OUTGOING_QUEUE_DEPTH: usize = 64;

type WsSink = SplitSink<ws::ClientWs, WsMessage>;
type WsStream = SplitStream<ws::ClientWs>;

/// Teardown coordinator for one connection attempt.
///
/// Any task that sees the connection fail calls `signal_closed`; the
/// compare-and-swap guarantees the done signal fires exactly once.
pub struct AttemptGuard {
    closed: AtomicBool,
    done_tx: watch::Sender<bool>,
    stop_heartbeat: Notify,
}

impl AttemptGuard {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            closed: AtomicBool::new(false),
            done_tx: watch::channel(false).0,
            stop_heartbeat: Notify::new(),
        })
    }

    /// Mark the connection closed. Idempotent.
    pub fn signal_closed(&self) {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.done_tx.send(true);
            self.stop_heartbeat.notify_waiters();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Resolve once the connection is closed.
    pub async fn closed_wait(&self) {
        let mut rx = self.done_tx.subscribe();
        // Error means the guard is being dropped, which also means closed.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

struct Connection {
    outgoing: mpsc::Sender<Message>,
    guard: Arc<AttemptGuard>,
}

/// Connection lifecycle, tracked implicitly rather than as an enum:
/// idle when `current` is empty, connecting and authenticating while
/// the `connecting` latch is held, connected while the current guard
/// is open, closing once the guard has been signaled.
pub struct Supervisor {
    config: ClientConfig,
    private_key: RsaPrivateKey,
    handler: Arc<dyn SignalHandler>,
    /// Single-flight latch for connection attempts.
    connecting: AtomicBool,
    current: Mutex<Option<Connection>>,
}

impl Supervisor {
    pub fn new(
        config: ClientConfig,
        private_key_pem: &str,
        handler: Arc<dyn SignalHandler>,
    ) -> TetherResult<Self> {
        let private_key = crypto::parse_private_key(private_key_pem)?;
        Ok(Self {
            config,
            private_key,
            handler,
            connecting: AtomicBool::new(false),
            current: Mutex::new(None),
        })
    }

    /// Establish a connection: dial, authenticate, spawn the read, write,
    /// and heartbeat tasks. Replaces any previous connection.
    pub async fn connect(&self) -> TetherResult<()> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TetherError::Other(
                "connection attempt already in progress".into(),
            ));
        }
        let result = self.connect_locked().await;
        self.connecting.store(false, Ordering::Release);
        result
    }

    async fn connect_locked(&self) -> TetherResult<()> {
        // Tear down a previous connection before replacing it.
        if let Some(old) = self.current.lock().await.take() {
            old.guard.signal_closed();
        }

        // Dial and handshake share one deadline so a stalled relay cannot
        // wedge the attempt.
        let deadline = Duration::from_secs(self.config.websocket.connect_timeout.max(1));
        let socket = tokio::time::timeout(deadline, async {
            let mut socket = ws::connect(&self.config.server.url).await?;
            auth::authenticate(&mut socket, &self.config.client.id, &self.private_key).await?;
            Ok::<_, TetherError>(socket)
        })
        .await
        .map_err(|_| TetherError::Timeout)??;
        info!(client = %self.config.client.id, url = %self.config.server.url, "authenticated");

        let (ws_tx, ws_rx) = socket.split();
        let (outgoing_tx, outgoing_rx) = mpsc::channel(OUTGOING_QUEUE_DEPTH);
        let guard = AttemptGuard::new();
        let last_ping_at = Arc::new(StdMutex::new(None));

        *self.current.lock().await = Some(Connection {
            outgoing: outgoing_tx.clone(),
            guard: guard.clone(),
        });

        tokio::spawn(write_loop(ws_tx, outgoing_rx, guard.clone()));
        tokio::spawn(read_loop(
            ws_rx,
            self.handler.clone(),
            last_ping_at.clone(),
            guard.clone(),
        ));
        if self.config.websocket.ping_interval > 0 {
            tokio::spawn(heartbeat_loop(
                Duration::from_secs(self.config.websocket.ping_interval),
                outgoing_tx,
                self.handler.clone(),
                last_ping_at,
                guard,
            ));
        }
        Ok(())
    }

    /// Close the current connection, if any.
    pub async fn close(&self) {
        if let Some(conn) = self.current.lock().await.take() {
            conn.guard.signal_closed();
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self.current.lock().await.as_ref() {
            Some(conn) => !conn.guard.is_closed(),
            None => false,
        }
    }

    /// Queue a message for the relay.
    pub async fn send(&self, msg: Message) -> TetherResult<()> {
        let outgoing = {
            let current = self.current.lock().await;
            match current.as_ref() {
                Some(conn) if !conn.guard.is_closed() => conn.outgoing.clone(),
                _ => return Err(TetherError::NotConnected),
            }
        };
        outgoing
            .send(msg)
            .await
            .map_err(|_| TetherError::NotConnected)
    }

    /// Ask the relay to broker a session with `target_id` in `space_id`.
    pub async fn send_connect(&self, target_id: &str, space_id: &str) -> TetherResult<()> {
        self.send(Message::Connect {
            source_id: None,
            target_id: target_id.to_string(),
            space_id: space_id.to_string(),
            data: None,
        })
        .await
    }

    pub async fn send_offer(&self, target_id: &str, sdp: &str) -> TetherResult<()> {
        self.send(Message::Offer {
            sdp: sdp.to_string(),
            source_id: None,
            target_id: target_id.to_string(),
            space_id: None,
        })
        .await
    }

    pub async fn send_answer(&self, target_id: &str, sdp: &str) -> TetherResult<()> {
        self.send(Message::Answer {
            sdp: sdp.to_string(),
            source_id: None,
            target_id: target_id.to_string(),
            space_id: None,
        })
        .await
    }

    pub async fn send_ice_candidates(
        &self,
        target_id: &str,
        candidates: Vec<IceCandidate>,
    ) -> TetherResult<()> {
        self.send(Message::IceCandidates {
            source_id: None,
            target_id: target_id.to_string(),
            from_client_id: None,
            ice_candidates: candidates,
        })
        .await
    }

    /// Keep a connection alive until shutdown: connect, wait for the
    /// link to drop, back off, retry.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut failures: u32 = 0;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect().await {
                Ok(()) => {
                    failures = 0;
                    let guard = match self.current.lock().await.as_ref() {
                        Some(conn) => conn.guard.clone(),
                        None => continue,
                    };
                    tokio::select! {
                        _ = guard.closed_wait() => {
                            warn!(client = %self.config.client.id, "connection lost");
                        }
                        _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => {
                            self.close().await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(client = %self.config.client.id, error = %e, failures, "connect failed");
                }
            }

            let delay = backoff_delay(
                failures,
                Duration::from_secs(self.config.websocket.reconnect_initial_delay.max(1)),
                Duration::from_secs(self.config.websocket.reconnect_max_delay.max(1)),
            );
            debug!(client = %self.config.client.id, delay_ms = delay.as_millis() as u64, "reconnecting after delay");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
        info!(client = %self.config.client.id, "supervisor stopped");
    }
}

/// Delay before reconnect attempt number `failures` (0 = first retry
/// after a lost link). Doubles per consecutive failure, jittered to
/// between half and full value, capped at `max`.
fn backoff_delay(failures: u32, initial: Duration, max: Duration) -> Duration {
    let doubled = initial.saturating_mul(2u32.saturating_pow(failures.min(16)));
    let capped = doubled.min(max);
    let jitter = rand::thread_rng().gen_range(0.5..=1.0);
    capped.mul_f64(jitter)
}

async fn write_loop(
    mut ws_tx: WsSink,
    mut outgoing_rx: mpsc::Receiver<Message>,
    guard: Arc<AttemptGuard>,
) {
    loop {
        tokio::select! {
            _ = guard.closed_wait() => {
                let _ = ws_tx.close().await;
                break;
            }
            queued = outgoing_rx.recv() => {
                let Some(msg) = queued else {
                    guard.signal_closed();
                    break;
                };
                if let Err(e) = ws::send_message(&mut ws_tx, &msg).await {
                    debug!(error = %e, "send failed");
                    guard.signal_closed();
                    break;
                }
            }
        }
    }
}

async fn read_loop(
    mut ws_rx: WsStream,
    handler: Arc<dyn SignalHandler>,
    last_ping_at: Arc<StdMutex<Option<Instant>>>,
    guard: Arc<AttemptGuard>,
) {
    loop {
        tokio::select! {
            _ = guard.closed_wait() => break,
            incoming = ws::recv_message(&mut ws_rx) => {
                match incoming {
                    Ok(Some(msg)) => dispatch_incoming(handler.as_ref(), &last_ping_at, msg),
                    Ok(None) => {
                        debug!("relay closed connection");
                        guard.signal_closed();
                        break;
                    }
                    Err(e) => {
                        debug!(error = %e, "recv failed");
                        guard.signal_closed();
                        break;
                    }
                }
            }
        }
    }
}

/// Route one relayed message to the handler.
fn dispatch_incoming(
    handler: &dyn SignalHandler,
    last_ping_at: &StdMutex<Option<Instant>>,
    msg: Message,
) {
    match msg {
        Message::Connect {
            source_id, data, ..
        } => {
            let from = source_id.unwrap_or_default();
            let turn_servers = data.map(|d| d.turn_servers).unwrap_or_default();
            handler.on_connect(&from, &turn_servers);
        }
        Message::Offer { source_id, sdp, .. } => {
            handler.on_offer(&source_id.unwrap_or_default(), &sdp);
        }
        Message::Answer { source_id, sdp, .. } => {
            handler.on_answer(&source_id.unwrap_or_default(), &sdp);
        }
        Message::IceCandidates {
            from_client_id,
            source_id,
            ice_candidates,
            ..
        } => {
            let from = from_client_id.or(source_id).unwrap_or_default();
            handler.on_ice_candidates(&from, &ice_candidates);
        }
        Message::Pong { data } => {
            let rtt = last_ping_at
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .map(|sent| sent.elapsed());
            handler.on_pong(data, rtt);
        }
        other => {
            debug!(kind = other.kind(), "ignoring message from relay");
        }
    }
}

async fn heartbeat_loop(
    period: Duration,
    outgoing: mpsc::Sender<Message>,
    handler: Arc<dyn SignalHandler>,
    last_ping_at: Arc<StdMutex<Option<Instant>>>,
    guard: Arc<AttemptGuard>,
) {
    let mut ticker = tokio::time::interval(period);
    // The immediate first tick would race the handshake; skip it.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = guard.stop_heartbeat.notified() => break,
            _ = guard.closed_wait() => break,
            _ = ticker.tick() => {
                let ping = Message::Ping {
                    data: PingData {
                        timestamp: unix_ms(),
                        webrtc_status: handler.peer_states(),
                    },
                };
                if let Ok(mut slot) = last_ping_at.lock() {
                    *slot = Some(Instant::now());
                }
                if outgoing.send(ping).await.is_err() {
                    break;
                }
            }
        }
    }
}
