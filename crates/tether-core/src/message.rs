//! Signaling wire messages.
//!
//! Every frame on the wire is one JSON object with a `type` discriminator,
//! decoded exactly once at the transport boundary into this closed tagged
//! union. Routing fields (`source_id`, `target_id`) are advisory as claimed
//! by the sender; attribution fields written by the relay (`source_id` on
//! forwarded offer/answer/connect, `from_client_id` on forwarded ICE
//! batches) always name the authenticated sender.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::TetherResult;

/// One signaling message. `type` on the wire selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// First handshake message: the claimed client identifier.
    Auth { data: String },
    /// Server challenge: base64 of the RSA-encrypted challenge text.
    Challenge { data: String },
    /// Client response: the decrypted challenge text, verbatim.
    ChallengeResponse { data: String },
    /// Client heartbeat. Answered locally with `Pong`, never relayed.
    Ping { data: PingData },
    /// Heartbeat reply: server wall-clock in unix milliseconds.
    Pong { data: i64 },
    /// Peer-setup request/notification. A client sends it with
    /// `target_id` + `space_id`; the relay forwards it to the target with
    /// `source_id` filled in and the space's TURN credentials attached.
    Connect {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        target_id: String,
        space_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<ConnectData>,
    },
    /// SDP offer, relayed by `target_id`.
    Offer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_id: Option<String>,
    },
    /// SDP answer, relayed by `target_id`.
    Answer {
        sdp: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        space_id: Option<String>,
    },
    /// Batched ICE candidates, relayed by `target_id`. The relay rewrites
    /// `from_client_id` to the authenticated sender; recipients use it as
    /// the reply address.
    IceCandidates {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        source_id: Option<String>,
        target_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_client_id: Option<String>,
        ice_candidates: Vec<IceCandidate>,
    },
    /// Registry snapshot pushed to monitor connections only.
    ClientsInfo { data: Vec<ClientInfo> },
}

impl Message {
    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> TetherResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form. An unknown `type` is a codec error.
    pub fn from_json(text: &str) -> TetherResult<Message> {
        Ok(serde_json::from_str(text)?)
    }

    /// Wire discriminator for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Auth { .. } => "auth",
            Message::Challenge { .. } => "challenge",
            Message::ChallengeResponse { .. } => "challenge_response",
            Message::Ping { .. } => "ping",
            Message::Pong { .. } => "pong",
            Message::Connect { .. } => "connect",
            Message::Offer { .. } => "offer",
            Message::Answer { .. } => "answer",
            Message::IceCandidates { .. } => "ice_candidates",
            Message::ClientsInfo { .. } => "clients_info",
        }
    }
}

/// Heartbeat payload: the client's send timestamp (unix ms) plus an
/// advisory map of peer id to peer-connection state. The state strings are
/// client-supplied and never verified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PingData {
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub webrtc_status: HashMap<String, String>,
}

/// Payload attached to a relayed `connect`: the TURN credentials scoped to
/// the requested space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectData {
    pub turn_servers: Vec<TurnServer>,
}

/// One TURN credential record. Read-only input to connect orchestration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnServer {
    pub url: String,
    pub username: String,
    pub password: String,
}

/// One proposed network path. Immutable once created; relayed in ordered
/// batches with the payload fields untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: u16,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: String,
}

/// One row of the registry snapshot sent to monitors. Timestamps are unix
/// milliseconds; `last_ping_delay` is the last measured one-way delay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: String,
    pub space_id: String,
    pub connected_at: i64,
    pub last_ping_time: i64,
    pub last_ping_delay: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub webrtc_status: HashMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_wire_shape() {
        let msg = Message::Auth {
            data: "client-1".into(),
        };
        assert_eq!(
            msg.to_json().unwrap(),
            r#"{"type":"auth","data":"client-1"}"#
        );
    }

    #[test]
    fn ping_parses_wire_shape() {
        let text = r#"{"type":"ping","data":{"timestamp":1700000000000,"webrtc_status":{"peer-a":"connected"}}}"#;
        let msg = Message::from_json(text).unwrap();
        match msg {
            Message::Ping { data } => {
                assert_eq!(data.timestamp, 1_700_000_000_000);
                assert_eq!(
                    data.webrtc_status.get("peer-a").map(String::as_str),
                    Some("connected")
                );
            }
            other => panic!("expected ping, got {}", other.kind()),
        }
    }

    #[test]
    fn ping_status_is_optional() {
        let msg = Message::from_json(r#"{"type":"ping","data":{"timestamp":5}}"#).unwrap();
        match msg {
            Message::Ping { data } => assert!(data.webrtc_status.is_empty()),
            other => panic!("expected ping, got {}", other.kind()),
        }
    }

    #[test]
    fn ice_candidate_field_casing() {
        let msg = Message::IceCandidates {
            source_id: Some("a".into()),
            target_id: "b".into(),
            from_client_id: None,
            ice_candidates: vec![IceCandidate {
                candidate: "candidate:0 1 UDP 2122252543 10.0.0.1 50000 typ host".into(),
                sdp_mline_index: 0,
                sdp_mid: "0".into(),
            }],
        };
        let text = msg.to_json().unwrap();
        assert!(text.contains(r#""sdpMLineIndex":0"#), "got: {text}");
        assert!(text.contains(r#""sdpMid":"0""#), "got: {text}");
        assert!(!text.contains("from_client_id"), "absent field serialized: {text}");
        assert_eq!(Message::from_json(&text).unwrap(), msg);
    }

    #[test]
    fn connect_round_trip_with_credentials() {
        let msg = Message::Connect {
            source_id: Some("a".into()),
            target_id: "b".into(),
            space_id: "s1".into(),
            data: Some(ConnectData {
                turn_servers: vec![TurnServer {
                    url: "turn:x".into(),
                    username: "u".into(),
                    password: "p".into(),
                }],
            }),
        };
        let text = msg.to_json().unwrap();
        assert!(text.contains(r#""type":"connect""#));
        assert!(text.contains(r#""turn_servers""#));
        assert_eq!(Message::from_json(&text).unwrap(), msg);
    }

    #[test]
    fn unknown_type_is_codec_error() {
        assert!(Message::from_json(r#"{"type":"bogus","data":1}"#).is_err());
    }

    #[test]
    fn pong_carries_plain_timestamp() {
        let msg = Message::from_json(r#"{"type":"pong","data":1700000000123}"#).unwrap();
        assert_eq!(msg, Message::Pong { data: 1_700_000_000_123 });
    }
}
