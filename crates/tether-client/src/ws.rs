//! Client-side WebSocket framing.
//!
//! Protocol messages travel as JSON text frames. The helpers are generic
//! over the stream so they work on a whole `WebSocketStream` during the
//! handshake and on split halves afterwards.

use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tether_core::{Message, TetherError, TetherResult};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

pub type ClientWs = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Open a WebSocket connection to the relay.
pub async fn connect(url: &str) -> TetherResult<ClientWs> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TetherError::Transport(format!("connect to {url} failed: {e}")))?;
    Ok(ws)
}

/// Send one protocol message as a text frame.
pub async fn send_message<S>(ws: &mut S, msg: &Message) -> TetherResult<()>
where
    S: Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = msg.to_json()?;
    ws.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| TetherError::Transport(format!("send failed: {e}")))
}

/// Receive the next protocol message. Returns `None` when the relay
/// closes the connection.
pub async fn recv_message<S>(ws: &mut S) -> TetherResult<Option<Message>>
where
    S: Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return Message::from_json(&text).map(Some);
            }
            Some(Ok(WsMessage::Close(_))) => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => {
                return Err(TetherError::Transport(format!("recv failed: {e}")));
            }
            None => return Ok(None),
        }
    }
}
