//! Handler dispatch shared by every broker implementation.
//!
//! Decodes a raw delivery, hands it to the handler and reports whether the
//! broker should ack or requeue.

use tracing::{debug, error, warn};

use super::{Delivery, Envelope, MessageHandler, Queue, RoutingKey};

/// Result of processing a message through a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchResult {
    /// Handler succeeded, safe to acknowledge.
    Success,
    /// Handler failed, requeue for redelivery.
    HandlerFailed,
    /// Payload or routing key could not be decoded, no retry will help.
    DecodeError,
}

impl DispatchResult {
    /// Returns true if the message should be acknowledged (removed from queue).
    ///
    /// Decode errors are acked to prevent infinite redelivery of bad messages.
    pub fn should_ack(&self) -> bool {
        matches!(self, Self::Success | Self::DecodeError)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Why a raw delivery could not be turned into a `Delivery`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeFailure {
    #[error(transparent)]
    RoutingKey(#[from] super::topology::UnknownRoutingKey),
    #[error("malformed envelope: {0}")]
    Envelope(#[from] serde_json::Error),
}

pub fn decode_delivery(
    routing_key: &str,
    payload: &[u8],
    redelivered: bool,
) -> std::result::Result<Delivery, DecodeFailure> {
    let routing_key: RoutingKey = routing_key.parse()?;
    let envelope = Envelope::from_bytes(payload)?;
    Ok(Delivery {
        routing_key,
        envelope,
        redelivered,
    })
}

/// Decode → handle → settle decision for one raw delivery.
pub async fn process_message(
    queue: Queue,
    routing_key: &str,
    payload: &[u8],
    redelivered: bool,
    handler: &dyn MessageHandler,
) -> DispatchResult {
    let delivery = match decode_delivery(routing_key, payload, redelivered) {
        Ok(delivery) => delivery,
        Err(e) => {
            warn!(
                queue = %queue,
                routing_key = %routing_key,
                error = %e,
                "Dropping undecodable message"
            );
            return DispatchResult::DecodeError;
        }
    };

    let owner_id = delivery.envelope.owner_id.clone();
    match handler.handle(delivery).await {
        Ok(()) => {
            debug!(queue = %queue, routing_key = %routing_key, owner_id = %owner_id, "Handled message");
            DispatchResult::Success
        }
        Err(e) => {
            error!(
                queue = %queue,
                routing_key = %routing_key,
                owner_id = %owner_id,
                error = %e,
                "Handler failed, requeueing"
            );
            DispatchResult::HandlerFailed
        }
    }
}
