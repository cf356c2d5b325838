//! Error types for the sync client.

use consult_core::{FetchError, SessionError};
use consult_realtime::ChannelError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Session store error: {0}")]
    Session(#[from] SessionError),
    #[error("Request failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Realtime channel error: {0}")]
    Channel(#[from] ChannelError),
    #[error("Failed to initialise logging: {0}")]
    Telemetry(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
