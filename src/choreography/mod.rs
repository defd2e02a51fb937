//! Cross-service trip choreography.
//!
//! ```text
//! trip.event.created ─┐
//!                     ├─► find_available_drivers ─► TripMatcher ─┬─► driver.cmd.trip_request (owner = driver)
//! trip.event.driver_  ┘                                          └─► trip.event.no_drivers_found (owner = rider)
//!   not_interested
//!
//! driver.cmd.trip_accept ─┐
//!                         ├─► driver_trip_response ─► TripResponseHandler ─┬─► trip.event.driver_assigned
//! driver.cmd.trip_decline ┘                                                 └─► trip.event.driver_not_interested
//! ```

mod matching;
mod response;

use tracing::warn;

use crate::bus::HandlerError;
use crate::clients::ClientError;

pub use matching::{FirstTierMatch, SelectionPolicy, TripMatcher};
pub use response::TripResponseHandler;

/// Transient collaborator failures requeue; verdicts are logged and acked.
fn requeue_if_transient(
    operation: &str,
    trip_id: &str,
    e: ClientError,
) -> Result<(), HandlerError> {
    if e.is_retryable() {
        return Err(HandlerError::Collaborator(format!("{operation}: {e}")));
    }
    warn!(trip_id = %trip_id, operation, error = %e, "Trip service refused, acking");
    Ok(())
}
