//! Connection registry: the authoritative map of authenticated clients.
//!
//! Each client id maps to at most one live session. A re-registration
//! under the same id supersedes the old session, which is told to close
//! via its `superseded` handle. Sessions carry a monotonic sequence
//! number so that the cleanup of a superseded connection cannot evict
//! the replacement that took its slot.
//!
//! Every mutation publishes a fresh snapshot to the observer hub. The
//! snapshot is computed while holding the lock and sent after release.

use crate::observer::ObserverHub;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tether_core::{unix_ms, ClientInfo, Message};
use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info};

/// One live authenticated session.
pub struct ClientSession {
    pub id: String,
    pub space_id: String,
    pub connected_at: i64,
    pub last_ping_time: i64,
    pub last_ping_delay: i64,
    pub webrtc_status: HashMap<String, String>,
    /// Outbound queue drained by the session's write half.
    pub outbound: mpsc::Sender<Message>,
    /// Fired when a newer connection takes over this id.
    pub superseded: Arc<Notify>,
    /// Registration sequence; guards unregister against the replacement.
    pub seq: u64,
}

/// Routing handle for a registered client.
#[derive(Clone)]
pub struct SessionHandle {
    pub space_id: String,
    pub outbound: mpsc::Sender<Message>,
}

pub struct Registry {
    sessions: RwLock<HashMap<String, ClientSession>>,
    observers: ObserverHub,
    next_seq: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            observers: ObserverHub::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn observers(&self) -> &ObserverHub {
        &self.observers
    }

    /// Register a session, superseding any live session with the same id.
    /// Returns the sequence number the caller must pass to [`unregister`].
    ///
    /// [`unregister`]: Registry::unregister
    pub async fn register(
        &self,
        id: &str,
        space_id: &str,
        outbound: mpsc::Sender<Message>,
        superseded: Arc<Notify>,
    ) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let session = ClientSession {
            id: id.to_string(),
            space_id: space_id.to_string(),
            connected_at: unix_ms(),
            last_ping_time: 0,
            last_ping_delay: 0,
            webrtc_status: HashMap::new(),
            outbound,
            superseded,
            seq,
        };

        let snapshot = {
            let mut sessions = self.sessions.write().await;
            if let Some(old) = sessions.insert(id.to_string(), session) {
                info!(client = %id, "session superseded by new connection");
                old.superseded.notify_one();
            } else {
                info!(client = %id, space = %space_id, "client registered");
            }
            snapshot_locked(&sessions)
        };
        self.observers.broadcast(snapshot).await;
        seq
    }

    /// Remove a session, but only if it still owns its slot. A superseded
    /// connection calling this with its stale seq is a no-op.
    pub async fn unregister(&self, id: &str, seq: u64) {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(id) {
                Some(current) if current.seq == seq => {
                    sessions.remove(id);
                    info!(client = %id, "client unregistered");
                }
                Some(_) => {
                    debug!(client = %id, "skipping unregister, slot owned by newer session");
                    return;
                }
                None => return,
            }
            snapshot_locked(&sessions)
        };
        self.observers.broadcast(snapshot).await;
    }

    /// Record a heartbeat: last ping time, measured delay, and the
    /// client's advisory peer-connection states. Returns false for ids
    /// with no live session.
    pub async fn update_heartbeat(
        &self,
        id: &str,
        timestamp: i64,
        webrtc_status: HashMap<String, String>,
    ) -> bool {
        let snapshot = {
            let mut sessions = self.sessions.write().await;
            let Some(session) = sessions.get_mut(id) else {
                return false;
            };
            let now = unix_ms();
            session.last_ping_time = now;
            session.last_ping_delay = now.saturating_sub(timestamp);
            session.webrtc_status = webrtc_status;
            snapshot_locked(&sessions)
        };
        self.observers.broadcast(snapshot).await;
        true
    }

    /// Routing lookup.
    pub async fn lookup(&self, id: &str) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        sessions.get(id).map(|s| SessionHandle {
            space_id: s.space_id.clone(),
            outbound: s.outbound.clone(),
        })
    }

    /// Current full registry snapshot.
    pub async fn snapshot(&self) -> Vec<ClientInfo> {
        let sessions = self.sessions.read().await;
        snapshot_locked(&sessions)
    }

    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

fn snapshot_locked(sessions: &HashMap<String, ClientSession>) -> Vec<ClientInfo> {
    let mut rows: Vec<ClientInfo> = sessions
        .values()
        .map(|s| ClientInfo {
            id: s.id.clone(),
            space_id: s.space_id.clone(),
            connected_at: s.connected_at,
            last_ping_time: s.last_ping_time,
            last_ping_delay: s.last_ping_delay,
            webrtc_status: s.webrtc_status.clone(),
        })
        .collect();
    // Stable ordering keeps monitor output and tests deterministic.
    rows.sort_by(|a, b| a.id.cmp(&b.id));
    rows
}
