//! Session registry.
//!
//! An outer read-write lock guards the map; each connection has its own
//! mutex so writes to one session never interleave and never block others.
//! No sink is ever awaited while the map lock is held.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use super::{DuplicateSessionPolicy, SessionMessage, SessionSink};

/// Distinguishes successive sessions registered under the same key.
pub type SessionId = u64;

pub type SharedSink = Arc<Mutex<Box<dyn SessionSink>>>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session already connected: {0}")]
    AlreadyConnected(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("failed to write to session {key}: {reason}")]
    Send { key: String, reason: String },
}

struct Entry {
    id: SessionId,
    sink: SharedSink,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Entry>>,
    policy: DuplicateSessionPolicy,
    next_id: AtomicU64,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DuplicateSessionPolicy::default())
    }
}

impl SessionRegistry {
    pub fn new(policy: DuplicateSessionPolicy) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn policy(&self) -> DuplicateSessionPolicy {
        self.policy
    }

    /// Register `sink` under `key`.
    ///
    /// Under `Replace` the new connection is installed at once and the
    /// superseded one is closed in the background. Under `Reject` the
    /// existing session stays and the call fails with `AlreadyConnected`.
    pub async fn add(
        &self,
        key: &str,
        sink: Box<dyn SessionSink>,
    ) -> Result<SessionId, RegistryError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Entry {
            id,
            sink: Arc::new(Mutex::new(sink)),
        };

        let superseded = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(key) && self.policy == DuplicateSessionPolicy::Reject {
                return Err(RegistryError::AlreadyConnected(key.to_string()));
            }
            sessions.insert(key.to_string(), entry)
        };

        if let Some(previous) = superseded {
            info!(key = %key, previous = previous.id, "Replacing existing session");
            // The old sink may still be wedged mid-write.
            let key = key.to_string();
            tokio::spawn(async move {
                if let Err(e) = previous.sink.lock().await.close().await {
                    debug!(key = %key, error = %e, "Superseded session already gone");
                }
            });
        }

        info!(key = %key, session_id = id, "Session added");
        Ok(id)
    }

    /// Deregister whatever session holds `key`. No-op if absent.
    pub async fn remove(&self, key: &str) {
        if self.sessions.write().await.remove(key).is_some() {
            info!(key = %key, "Session removed");
        }
    }

    /// Deregister `key` only if it still belongs to session `id`.
    ///
    /// Returns whether an entry was removed.
    pub async fn remove_session(&self, key: &str, id: SessionId) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(key) {
            Some(entry) if entry.id == id => {
                sessions.remove(key);
                info!(key = %key, session_id = id, "Session removed");
                true
            }
            Some(_) => {
                debug!(key = %key, session_id = id, "Session already superseded");
                false
            }
            None => false,
        }
    }

    pub async fn get(&self, key: &str) -> Result<SharedSink, RegistryError> {
        self.sessions
            .read()
            .await
            .get(key)
            .map(|entry| Arc::clone(&entry.sink))
            .ok_or_else(|| RegistryError::SessionNotFound(key.to_string()))
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.sessions.read().await.contains_key(key)
    }

    /// Serialize `message` and write it to the session under `key`.
    pub async fn send_message(
        &self,
        key: &str,
        message: &SessionMessage,
    ) -> Result<(), RegistryError> {
        let text = serde_json::to_string(message)?;
        let sink = self.get(key).await?;

        let mut sink = sink.lock().await;
        sink.send_text(text).await.map_err(|e| {
            warn!(key = %key, error = %e, "Session write failed");
            RegistryError::Send {
                key: key.to_string(),
                reason: e.0,
            }
        })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
