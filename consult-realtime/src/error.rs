//! Error types for realtime operations.

use thiserror::Error;

/// Errors raised by the physical realtime connection.
///
/// These are logged by the reconnect loop and never surface to subscribers.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("connection closed")]
    Closed,

    #[error("failed to decode frame: {0}")]
    Decode(String),

    #[error("failed to encode frame: {0}")]
    Encode(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ChannelError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Closed,
            other => Self::Connect(other.to_string()),
        }
    }
}

/// Result type for realtime operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
