//! tether-core: shared protocol library for the tether signaling relay.
//!
//! Provides the JSON wire message model, the RSA challenge-response crypto
//! used by the admission handshake, and the shared error type.

pub mod crypto;
pub mod error;
pub mod message;

// Re-export commonly used items at crate root.
pub use error::{TetherError, TetherResult};
pub use message::{
    ClientInfo, ConnectData, IceCandidate, Message, PingData, TurnServer,
};

/// Current wall-clock time as milliseconds since the Unix epoch.
///
/// All protocol timestamps (ping/pong, snapshot rows) use this scale.
pub fn unix_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
