//! Error types shared across the Consult crates.

use thiserror::Error;

/// Failure of a single HTTP request against the backend.
///
/// `Clone` so that one outcome can be handed to every caller waiting on the
/// same cache key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("HTTP {status}: {}", .message.as_deref().unwrap_or("request failed"))]
    Status { status: u16, message: Option<String> },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl FetchError {
    /// HTTP status carried by the error, if the server answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for failures that reached (or tried to reach) the network.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Status { .. } | Self::Transport(_))
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

/// Errors raised by persistent session stores.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_display_uses_server_message() {
        let err = FetchError::Status {
            status: 409,
            message: Some("Slot already booked".to_string()),
        };
        assert_eq!(err.to_string(), "HTTP 409: Slot already booked");
        assert_eq!(err.status(), Some(409));
        assert!(err.is_network());
    }

    #[test]
    fn test_status_error_display_without_message() {
        let err = FetchError::Status {
            status: 500,
            message: None,
        };
        assert_eq!(err.to_string(), "HTTP 500: request failed");
    }

    #[test]
    fn test_decode_error_from_serde() {
        let err: FetchError = serde_json::from_str::<u32>("\"nope\"").unwrap_err().into();
        assert!(matches!(err, FetchError::Decode(_)));
        assert!(!err.is_network());
        assert_eq!(err.status(), None);
    }
}
