//! Wire format of realtime messages: a named topic plus a JSON payload.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// One realtime message, inbound or outbound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn to_json(&self) -> Result<String, ChannelError> {
        serde_json::to_string(self).map_err(|e| ChannelError::Encode(e.to_string()))
    }

    pub fn from_json(text: &str) -> Result<Self, ChannelError> {
        serde_json::from_str(text).map_err(|e| ChannelError::Decode(e.to_string()))
    }
}
