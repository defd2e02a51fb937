//! Live WebSocket sessions keyed by user id.
//!
//! - `SessionRegistry`: key → connection map with per-connection write locks
//! - `SessionRelay`: broker handler that forwards envelopes to the owning session
//! - `SessionSink`: the write half of a connection, abstracted for tests

mod registry;
mod relay;
mod ws;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use registry::{RegistryError, SessionId, SessionRegistry, SharedSink};
pub use relay::SessionRelay;
pub use ws::WsSink;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("session write failed: {0}")]
pub struct SinkError(pub String);

/// Write half of a client connection.
#[async_trait]
pub trait SessionSink: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError>;

    async fn close(&mut self) -> Result<(), SinkError>;
}

/// Frame pushed to a client: `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl SessionMessage {
    pub fn new(message_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            message_type: message_type.into(),
            data,
        }
    }
}

/// What `add` does when the key already has a live session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateSessionPolicy {
    /// Refuse the newcomer with `AlreadyConnected`.
    Reject,
    /// Close the existing connection and install the newcomer.
    #[default]
    Replace,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    pub duplicate_policy: DuplicateSessionPolicy,
}
