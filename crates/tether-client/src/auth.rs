//! Client side of the admission handshake.
//!
//! Sends the claimed id, decrypts the server's challenge with the private
//! key, and returns the plaintext. The server registers the connection
//! only after the response checks out; the relay drops the socket on any
//! failure, so a closed connection here means the handshake was refused.

use crate::ws::{self, ClientWs};
use tether_core::crypto::{self, RsaPrivateKey};
use tether_core::{Message, TetherError, TetherResult};
use tracing::debug;

/// Run the handshake on a freshly opened connection.
pub async fn authenticate(
    ws: &mut ClientWs,
    client_id: &str,
    private_key: &RsaPrivateKey,
) -> TetherResult<()> {
    ws::send_message(
        ws,
        &Message::Auth {
            data: client_id.to_string(),
        },
    )
    .await?;

    let challenge = match ws::recv_message(ws).await? {
        Some(Message::Challenge { data }) => data,
        Some(other) => {
            return Err(TetherError::HandshakeFailed(format!(
                "expected challenge, got {}",
                other.kind()
            )))
        }
        None => {
            return Err(TetherError::HandshakeFailed(
                "relay closed before challenge, id likely unknown".into(),
            ))
        }
    };

    let answer = crypto::decrypt_challenge(&challenge, private_key)?;
    ws::send_message(ws, &Message::ChallengeResponse { data: answer }).await?;
    debug!(client = %client_id, "handshake response sent");
    Ok(())
}
