//! Broker → session forwarding.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{RegistryError, SessionMessage, SessionRegistry};
use crate::bus::{Delivery, HandlerError, MessageHandler};

/// Forwards each delivery to the session named by its `ownerID`.
///
/// Always acks: an undecodable payload or an absent session is logged and
/// dropped, never requeued.
pub struct SessionRelay {
    registry: Arc<SessionRegistry>,
    role: &'static str,
}

impl SessionRelay {
    pub fn new(registry: Arc<SessionRegistry>, role: &'static str) -> Self {
        Self { registry, role }
    }
}

impl MessageHandler for SessionRelay {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let registry = Arc::clone(&self.registry);
        let role = self.role;
        Box::pin(async move {
            let owner = delivery.envelope.owner_id.as_str();
            let data = match delivery.envelope.data_value() {
                Ok(data) => data,
                Err(e) => {
                    warn!(role, owner_id = %owner, routing_key = %delivery.routing_key, error = %e, "Dropping undecodable payload");
                    return Ok(());
                }
            };

            let message = SessionMessage::new(delivery.routing_key.as_str(), data);
            match registry.send_message(owner, &message).await {
                Ok(()) => {
                    debug!(role, owner_id = %owner, routing_key = %delivery.routing_key, "Forwarded to session");
                }
                Err(RegistryError::SessionNotFound(_)) => {
                    warn!(role, owner_id = %owner, routing_key = %delivery.routing_key, "No session for owner, dropping");
                }
                Err(e) => {
                    warn!(role, owner_id = %owner, routing_key = %delivery.routing_key, error = %e, "Failed to forward to session");
                }
            }
            Ok(())
        })
    }
}
