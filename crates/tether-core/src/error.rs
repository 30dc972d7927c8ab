use thiserror::Error;

/// Errors produced by the tether protocol layer.
#[derive(Debug, Error)]
pub enum TetherError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("not connected")]
    NotConnected,

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TetherError {
    fn from(e: serde_json::Error) -> Self {
        TetherError::Codec(e.to_string())
    }
}

pub type TetherResult<T> = Result<T, TetherError>;
