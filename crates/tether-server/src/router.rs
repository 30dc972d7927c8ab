//! Message router: dispatches post-handshake traffic.
//!
//! Heartbeats terminate here; connect, offer, answer, and ICE batches are
//! relayed to the session registered under `target_id`. The router always
//! rewrites sender attribution (`source_id`, `from_client_id`) to the
//! authenticated caller, so a client cannot speak as another id no matter
//! what it puts in the payload. A missing target drops the message
//! silently apart from a debug log; signaling layers retry at their own
//! pace and an error reply would leak registry contents.
//!
//! Delivery into session queues never blocks: a full queue drops the
//! message. The caller's session task is the sole drainer of its own
//! queue, so a blocking send there would wedge the session, and one
//! stalled client's queue must not stall the sessions relaying to it.

use crate::registry::Registry;
use crate::store::CredentialStore;
use std::sync::Arc;
use tether_core::{unix_ms, ConnectData, Message};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// The authenticated sender of the message being dispatched.
pub struct Caller {
    pub id: String,
    pub space_id: String,
}

pub struct Router {
    registry: Arc<Registry>,
    credentials: Arc<dyn CredentialStore>,
}

impl Router {
    pub fn new(registry: Arc<Registry>, credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            registry,
            credentials,
        }
    }

    /// Handle one message from an authenticated client. `reply` is the
    /// caller's own outbound queue (for pong).
    pub async fn dispatch(&self, caller: &Caller, reply: &mpsc::Sender<Message>, msg: Message) {
        match msg {
            Message::Ping { data } => {
                if !self
                    .registry
                    .update_heartbeat(&caller.id, data.timestamp, data.webrtc_status)
                    .await
                {
                    warn!(client = %caller.id, "heartbeat from client missing in registry");
                }
                deliver(&caller.id, reply, Message::Pong { data: unix_ms() });
            }

            Message::Connect {
                target_id,
                space_id,
                ..
            } => {
                self.relay_connect(caller, target_id, space_id).await;
            }

            Message::Offer {
                sdp,
                target_id,
                space_id,
                ..
            } => {
                let forwarded = Message::Offer {
                    sdp,
                    source_id: Some(caller.id.clone()),
                    target_id: target_id.clone(),
                    space_id,
                };
                self.forward(caller, &target_id, forwarded).await;
            }

            Message::Answer {
                sdp,
                target_id,
                space_id,
                ..
            } => {
                let forwarded = Message::Answer {
                    sdp,
                    source_id: Some(caller.id.clone()),
                    target_id: target_id.clone(),
                    space_id,
                };
                self.forward(caller, &target_id, forwarded).await;
            }

            Message::IceCandidates {
                target_id,
                ice_candidates,
                ..
            } => {
                let forwarded = Message::IceCandidates {
                    source_id: Some(caller.id.clone()),
                    target_id: target_id.clone(),
                    from_client_id: Some(caller.id.clone()),
                    ice_candidates,
                };
                self.forward(caller, &target_id, forwarded).await;
            }

            other => {
                // Handshake and server-originated types are out of place here.
                debug!(client = %caller.id, kind = other.kind(), "dropping unexpected message");
            }
        }
    }

    /// Relay a connect request: both endpoints must belong to the
    /// requested space, and the space's TURN credentials ride along.
    async fn relay_connect(&self, caller: &Caller, target_id: String, space_id: String) {
        if caller.space_id != space_id {
            warn!(
                client = %caller.id,
                requested = %space_id,
                actual = %caller.space_id,
                "connect rejected, caller outside requested space"
            );
            return;
        }

        let Some(target) = self.registry.lookup(&target_id).await else {
            debug!(client = %caller.id, target = %target_id, "connect target not registered");
            return;
        };
        if target.space_id != space_id {
            warn!(
                client = %caller.id,
                target = %target_id,
                requested = %space_id,
                "connect rejected, target outside requested space"
            );
            return;
        }

        let turn_servers = self.credentials.credentials_for(&space_id);
        let forwarded = Message::Connect {
            source_id: Some(caller.id.clone()),
            target_id: target_id.clone(),
            space_id,
            data: Some(ConnectData { turn_servers }),
        };
        deliver(&target_id, &target.outbound, forwarded);
    }

    async fn forward(&self, caller: &Caller, target_id: &str, msg: Message) {
        let Some(target) = self.registry.lookup(target_id).await else {
            debug!(
                client = %caller.id,
                target = %target_id,
                kind = msg.kind(),
                "relay target not registered, dropping"
            );
            return;
        };
        deliver(target_id, &target.outbound, msg);
    }
}

/// Queue a message for a session without blocking. A full queue drops
/// the message; the protocol makes no delivery guarantee and signaling
/// layers retransmit at their own pace.
fn deliver(target_id: &str, tx: &mpsc::Sender<Message>, msg: Message) {
    match tx.try_send(msg) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(msg)) => {
            warn!(target = %target_id, kind = msg.kind(), "session queue full, dropping message");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!(target = %target_id, "relay target went away mid-relay");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StaticStore;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tether_core::{IceCandidate, PingData, TurnServer};
    use tokio::sync::Notify;

    struct Fixture {
        registry: Arc<Registry>,
        router: Router,
    }

    fn fixture(turn: Vec<(String, TurnServer)>) -> Fixture {
        let registry = Arc::new(Registry::new());
        let store = Arc::new(StaticStore::from_parts(Vec::new(), turn));
        let router = Router::new(registry.clone(), store);
        Fixture { registry, router }
    }

    async fn register(fix: &Fixture, id: &str, space: &str) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(8);
        fix.registry
            .register(id, space, tx, Arc::new(Notify::new()))
            .await;
        rx
    }

    fn caller(id: &str, space: &str) -> Caller {
        Caller {
            id: id.to_string(),
            space_id: space.to_string(),
        }
    }

    fn turn_entry(space: &str) -> (String, TurnServer) {
        (
            space.to_string(),
            TurnServer {
                url: "turn:relay.example.com:3478".into(),
                username: "u".into(),
                password: "p".into(),
            },
        )
    }

    #[tokio::test]
    async fn ping_gets_pong_and_updates_registry() {
        let fix = fixture(Vec::new());
        let _rx = register(&fix, "a", "s1").await;
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        let mut status = HashMap::new();
        status.insert("b".to_string(), "connected".to_string());
        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Ping {
                    data: PingData {
                        timestamp: unix_ms() - 10,
                        webrtc_status: status,
                    },
                },
            )
            .await;

        match reply_rx.recv().await {
            Some(Message::Pong { data }) => assert!(data > 0),
            other => panic!("expected pong, got {other:?}"),
        }
        let snapshot = fix.registry.snapshot().await;
        assert!(snapshot[0].last_ping_delay >= 10);
    }

    #[tokio::test]
    async fn offer_source_is_rewritten_to_authenticated_sender() {
        let fix = fixture(Vec::new());
        let mut b_rx = register(&fix, "b", "s1").await;
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Offer {
                    sdp: "v=0".into(),
                    source_id: Some("spoofed".into()),
                    target_id: "b".into(),
                    space_id: Some("s1".into()),
                },
            )
            .await;

        match b_rx.recv().await {
            Some(Message::Offer { source_id, sdp, .. }) => {
                assert_eq!(source_id.as_deref(), Some("a"));
                assert_eq!(sdp, "v=0");
            }
            other => panic!("expected offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_injects_turn_credentials() {
        let fix = fixture(vec![turn_entry("s1")]);
        let mut b_rx = register(&fix, "b", "s1").await;
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Connect {
                    source_id: None,
                    target_id: "b".into(),
                    space_id: "s1".into(),
                    data: None,
                },
            )
            .await;

        match b_rx.recv().await {
            Some(Message::Connect {
                source_id, data, ..
            }) => {
                assert_eq!(source_id.as_deref(), Some("a"));
                let servers = data.unwrap().turn_servers;
                assert_eq!(servers.len(), 1);
                assert_eq!(servers[0].url, "turn:relay.example.com:3478");
            }
            other => panic!("expected connect, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn connect_across_spaces_is_dropped() {
        let fix = fixture(Vec::new());
        let mut b_rx = register(&fix, "b", "s2").await;
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        // Target in a different space.
        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Connect {
                    source_id: None,
                    target_id: "b".into(),
                    space_id: "s1".into(),
                    data: None,
                },
            )
            .await;
        assert!(b_rx.try_recv().is_err());

        // Caller claiming a space it does not belong to.
        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Connect {
                    source_id: None,
                    target_id: "b".into(),
                    space_id: "s2".into(),
                    data: None,
                },
            )
            .await;
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_to_absent_target_is_silent() {
        let fix = fixture(Vec::new());
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Answer {
                    sdp: "v=0".into(),
                    source_id: None,
                    target_id: "ghost".into(),
                    space_id: None,
                },
            )
            .await;
        // No error message comes back.
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ice_batch_keeps_payload_and_sets_reply_address() {
        let fix = fixture(Vec::new());
        let mut b_rx = register(&fix, "b", "s1").await;
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        let batch = vec![
            IceCandidate {
                candidate: "candidate:0 1 UDP 2122252543 10.0.0.1 50000 typ host".into(),
                sdp_mline_index: 0,
                sdp_mid: "0".into(),
            },
            IceCandidate {
                candidate: "candidate:1 1 UDP 1686052607 203.0.113.9 50000 typ srflx".into(),
                sdp_mline_index: 0,
                sdp_mid: "0".into(),
            },
        ];
        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::IceCandidates {
                    source_id: None,
                    target_id: "b".into(),
                    from_client_id: Some("spoofed".into()),
                    ice_candidates: batch.clone(),
                },
            )
            .await;

        match b_rx.recv().await {
            Some(Message::IceCandidates {
                from_client_id,
                ice_candidates,
                ..
            }) => {
                assert_eq!(from_client_id.as_deref(), Some("a"));
                assert_eq!(ice_candidates, batch);
            }
            other => panic!("expected ice_candidates, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ping_with_full_reply_queue_does_not_block() {
        let fix = fixture(Vec::new());
        let _rx = register(&fix, "a", "s1").await;
        let (reply_tx, mut reply_rx) = mpsc::channel(1);
        reply_tx.try_send(Message::Pong { data: 0 }).unwrap();

        // The session task drains its own queue, so a blocking send here
        // would never complete. Dispatch must return with the pong dropped.
        tokio::time::timeout(
            Duration::from_secs(1),
            fix.router.dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Ping {
                    data: PingData {
                        timestamp: unix_ms(),
                        webrtc_status: HashMap::new(),
                    },
                },
            ),
        )
        .await
        .expect("dispatch blocked on full reply queue");

        assert!(matches!(
            reply_rx.try_recv(),
            Ok(Message::Pong { data: 0 })
        ));
        assert!(reply_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn relay_to_full_target_queue_drops_instead_of_blocking() {
        let fix = fixture(Vec::new());
        let (b_tx, mut b_rx) = mpsc::channel(1);
        fix.registry
            .register("b", "s1", b_tx.clone(), Arc::new(Notify::new()))
            .await;
        b_tx.try_send(Message::Pong { data: 0 }).unwrap();
        let (reply_tx, _reply_rx) = mpsc::channel(8);

        tokio::time::timeout(
            Duration::from_secs(1),
            fix.router.dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Offer {
                    sdp: "v=0".into(),
                    source_id: None,
                    target_id: "b".into(),
                    space_id: Some("s1".into()),
                },
            ),
        )
        .await
        .expect("dispatch blocked on full target queue");

        // Only the pre-filled message is in b's queue; the offer was dropped.
        assert!(matches!(b_rx.try_recv(), Ok(Message::Pong { data: 0 })));
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn handshake_messages_after_admission_are_dropped() {
        let fix = fixture(Vec::new());
        let (reply_tx, mut reply_rx) = mpsc::channel(8);
        fix.router
            .dispatch(
                &caller("a", "s1"),
                &reply_tx,
                Message::Auth { data: "a".into() },
            )
            .await;
        assert!(reply_rx.try_recv().is_err());
    }
}
