//! WebSocket listener and framing helpers using tokio-tungstenite.
//!
//! Two upgrade paths share one TCP listener: the signal path for clients
//! and the monitor path for observers. The requested path is captured
//! during the HTTP upgrade; anything else is refused with a 404 before
//! the WebSocket is established.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tether_core::{Message, TetherError, TetherResult};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request, Response,
};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Which upgrade path a connection arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Signal,
    Monitor,
}

/// An accepted WebSocket connection, not yet authenticated.
pub struct WsConnection {
    pub ws: WebSocketStream<TcpStream>,
    pub remote_addr: SocketAddr,
    pub kind: EndpointKind,
}

/// Bind the listener and start accepting upgrades.
///
/// Returns the bound address (useful when binding port 0) and a receiver
/// yielding accepted connections.
pub async fn start_listener(
    bind_addr: SocketAddr,
    signal_path: String,
    monitor_path: String,
) -> TetherResult<(SocketAddr, mpsc::Receiver<WsConnection>)> {
    let tcp_listener = TcpListener::bind(bind_addr)
        .await
        .map_err(|e| TetherError::Transport(format!("bind failed: {e}")))?;
    let local_addr = tcp_listener
        .local_addr()
        .map_err(|e| TetherError::Transport(format!("local_addr failed: {e}")))?;

    info!(addr = %local_addr, signal = %signal_path, monitor = %monitor_path, "listener started");

    let (tx, rx) = mpsc::channel::<WsConnection>(64);

    tokio::spawn(async move {
        loop {
            match tcp_listener.accept().await {
                Ok((stream, addr)) => {
                    let tx = tx.clone();
                    let signal_path = signal_path.clone();
                    let monitor_path = monitor_path.clone();
                    tokio::spawn(async move {
                        match accept_routed(stream, &signal_path, &monitor_path).await {
                            Ok((ws, kind)) => {
                                debug!(remote = %addr, ?kind, "connection accepted");
                                let conn = WsConnection {
                                    ws,
                                    remote_addr: addr,
                                    kind,
                                };
                                if tx.send(conn).await.is_err() {
                                    warn!("connection channel closed");
                                }
                            }
                            Err(e) => {
                                debug!(remote = %addr, error = %e, "upgrade refused");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                }
            }
        }
    });

    Ok((local_addr, rx))
}

/// Perform the WebSocket upgrade, classifying the connection by path.
async fn accept_routed(
    stream: TcpStream,
    signal_path: &str,
    monitor_path: &str,
) -> TetherResult<(WebSocketStream<TcpStream>, EndpointKind)> {
    let mut kind = None;
    let callback = |req: &Request, resp: Response| {
        let path = req.uri().path();
        if path == signal_path {
            kind = Some(EndpointKind::Signal);
            Ok(resp)
        } else if path == monitor_path {
            kind = Some(EndpointKind::Monitor);
            Ok(resp)
        } else {
            let mut refuse = ErrorResponse::new(None);
            *refuse.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::NOT_FOUND;
            Err(refuse)
        }
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback)
        .await
        .map_err(|e| TetherError::Transport(format!("upgrade failed: {e}")))?;
    let kind = kind.ok_or_else(|| TetherError::Transport("upgrade callback not run".into()))?;
    Ok((ws, kind))
}

/// Send one protocol message as a text frame.
///
/// Works on a whole `WebSocketStream` or on its split sink half.
pub async fn send_message<S>(ws: &mut S, msg: &Message) -> TetherResult<()>
where
    S: futures_util::Sink<WsMessage> + Unpin,
    S::Error: std::fmt::Display,
{
    let text = msg.to_json()?;
    ws.send(WsMessage::Text(text.into()))
        .await
        .map_err(|e| TetherError::Transport(format!("send failed: {e}")))
}

/// Receive the next protocol message.
///
/// Returns `None` when the peer closes. Control frames are skipped
/// (tungstenite answers pings itself); frames that do not decode are a
/// codec error.
pub async fn recv_message<S>(ws: &mut S) -> TetherResult<Option<Message>>
where
    S: futures_util::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(WsMessage::Text(text))) => {
                return Message::from_json(&text).map(Some);
            }
            Some(Ok(WsMessage::Binary(data))) => {
                let text = String::from_utf8(data.to_vec())
                    .map_err(|_| TetherError::Codec("binary frame is not UTF-8".into()))?;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn routes_by_path_and_refuses_unknown() {
        let (addr, mut rx) = start_listener(
            "127.0.0.1:0".parse().unwrap(),
            "/ws".to_string(),
            "/info".to_string(),
        )
        .await
        .unwrap();

        let (_signal, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let conn = rx.recv().await.unwrap();
        assert_eq!(conn.kind, EndpointKind::Signal);

        let (_monitor, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/info"))
            .await
            .unwrap();
        let conn = rx.recv().await.unwrap();
        assert_eq!(conn.kind, EndpointKind::Monitor);

        assert!(
            tokio_tungstenite::connect_async(format!("ws://{addr}/nope"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn round_trips_protocol_messages() {
        let (addr, mut rx) = start_listener(
            "127.0.0.1:0".parse().unwrap(),
            "/ws".to_string(),
            "/info".to_string(),
        )
        .await
        .unwrap();

        let client = tokio::spawn(async move {
            let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
                .await
                .unwrap();
            ws.send(WsMessage::Text(
                Message::Auth {
                    data: "client-1".into(),
                }
                .to_json()
                .unwrap()
                .into(),
            ))
            .await
            .unwrap();
            let frame = ws.next().await.unwrap().unwrap();
            match frame {
                WsMessage::Text(text) => Message::from_json(&text).unwrap(),
                other => panic!("expected text frame, got {other:?}"),
            }
        });

        let mut conn = rx.recv().await.unwrap();
        let msg = recv_message(&mut conn.ws).await.unwrap().unwrap();
        assert_eq!(
            msg,
            Message::Auth {
                data: "client-1".into()
            }
        );
        send_message(&mut conn.ws, &Message::Pong { data: 7 })
            .await
            .unwrap();

        assert_eq!(client.await.unwrap(), Message::Pong { data: 7 });
    }
}
