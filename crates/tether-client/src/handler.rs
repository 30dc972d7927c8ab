//! Application hooks for relayed signaling.
//!
//! The supervisor owns the socket; applications implement `SignalHandler`
//! to react to relayed messages and to report peer-connection states for
//! the heartbeat. Callbacks run on the read task, so implementations
//! should hand heavy work off to their own tasks.

use std::collections::HashMap;
use std::time::Duration;
use tether_core::{IceCandidate, TurnServer};
use tracing::info;

pub trait SignalHandler: Send + Sync {
    /// A peer asked to set up a session. `turn_servers` are the space's
    /// relay credentials as injected by the server.
    fn on_connect(&self, from: &str, turn_servers: &[TurnServer]);

    /// An SDP offer arrived from `from`.
    fn on_offer(&self, from: &str, sdp: &str);

    /// An SDP answer arrived from `from`.
    fn on_answer(&self, from: &str, sdp: &str);

    /// A batch of ICE candidates arrived from `from`.
    fn on_ice_candidates(&self, from: &str, candidates: &[IceCandidate]);

    /// Heartbeat acknowledged. `server_time` is the relay's clock in
    /// unix milliseconds; `rtt` is measured from the last ping sent on
    /// this connection, when one is pending.
    fn on_pong(&self, _server_time: i64, _rtt: Option<Duration>) {}

    /// Peer-connection states to attach to the next heartbeat, keyed by
    /// peer id. Default: nothing to report.
    fn peer_states(&self) -> HashMap<String, String> {
        HashMap::new()
    }
}

/// Handler that just logs what arrives. Useful for diagnostics and as a
/// placeholder while wiring up an application.
pub struct LogHandler;

impl SignalHandler for LogHandler {
    fn on_connect(&self, from: &str, turn_servers: &[TurnServer]) {
        info!(from = %from, turn_servers = turn_servers.len(), "connect received");
    }

    fn on_offer(&self, from: &str, sdp: &str) {
        info!(from = %from, sdp_bytes = sdp.len(), "offer received");
    }

    fn on_answer(&self, from: &str, sdp: &str) {
        info!(from = %from, sdp_bytes = sdp.len(), "answer received");
    }

    fn on_ice_candidates(&self, from: &str, candidates: &[IceCandidate]) {
        info!(from = %from, count = candidates.len(), "ice candidates received");
    }

    fn on_pong(&self, server_time: i64, rtt: Option<Duration>) {
        info!(server_time, rtt_ms = rtt.map(|d| d.as_millis() as u64), "pong received");
    }
}
