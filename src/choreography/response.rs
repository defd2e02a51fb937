//! Driver accept/decline handling.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{info, warn};

use super::requeue_if_transient;
use crate::bus::{Delivery, Envelope, HandlerError, MessageBroker, MessageHandler, RoutingKey};
use crate::clients::TripClient;
use crate::domain::{DriverTripResponse, TransitionOutcome, TripEvent, TripTransition};

/// Consumes `driver_trip_response`.
///
/// Accept assigns the driver and notifies the rider with the updated trip.
/// Decline puts the trip back into matching. Both are safe to redeliver:
/// the transition reports `AlreadyApplied` and the follow-up is republished.
#[derive(Clone)]
pub struct TripResponseHandler {
    trips: Arc<dyn TripClient>,
    broker: Arc<dyn MessageBroker>,
}

impl TripResponseHandler {
    pub fn new(trips: Arc<dyn TripClient>, broker: Arc<dyn MessageBroker>) -> Self {
        Self { trips, broker }
    }

    async fn process(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let response: DriverTripResponse = match delivery.envelope.decode_json() {
            Ok(response) => response,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Dropping undecodable driver response");
                return Ok(());
            }
        };

        match delivery.routing_key {
            RoutingKey::TripAccept => self.accept(response).await,
            RoutingKey::TripDecline => self.decline(response).await,
            other => {
                warn!(routing_key = %other, "Unexpected routing key on driver response queue");
                Ok(())
            }
        }
    }

    async fn accept(&self, response: DriverTripResponse) -> Result<(), HandlerError> {
        let trip_id = response.trip_id.as_str();
        let driver_id = response.driver.id.clone();

        if !self.trip_exists(trip_id).await? {
            return Ok(());
        }

        let outcome = match self
            .trips
            .update_trip(trip_id, TripTransition::Assign(response.driver))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return requeue_if_transient("assign driver", trip_id, e),
        };

        let trip = match self.trips.get_trip(trip_id).await {
            Ok(Some(trip)) => trip,
            Ok(None) => {
                warn!(trip_id = %trip_id, "Trip vanished after assignment");
                return Ok(());
            }
            Err(e) => return requeue_if_transient("reload trip", trip_id, e),
        };

        let envelope = Envelope::json(&trip.user_id, &TripEvent { trip: trip.clone() })?;
        self.broker
            .publish(RoutingKey::DriverAssigned, &envelope)
            .await?;

        info!(
            trip_id = %trip_id,
            driver_id = %driver_id,
            rider_id = %trip.user_id,
            redelivered = outcome == TransitionOutcome::AlreadyApplied,
            "Driver assigned"
        );
        Ok(())
    }

    async fn decline(&self, response: DriverTripResponse) -> Result<(), HandlerError> {
        let trip_id = response.trip_id.as_str();

        if !self.trip_exists(trip_id).await? {
            return Ok(());
        }

        if let Err(e) = self.trips.update_trip(trip_id, TripTransition::Rematch).await {
            return requeue_if_transient("rematch trip", trip_id, e);
        }

        let trip = match self.trips.get_trip(trip_id).await {
            Ok(Some(trip)) => trip,
            Ok(None) => {
                warn!(trip_id = %trip_id, "Trip vanished after decline");
                return Ok(());
            }
            Err(e) => return requeue_if_transient("reload trip", trip_id, e),
        };

        let envelope = Envelope::json(&response.rider_id, &TripEvent { trip })?;
        self.broker
            .publish(RoutingKey::DriverNotInterested, &envelope)
            .await?;

        info!(trip_id = %trip_id, driver_id = %response.driver.id, "Driver declined, rematching");
        Ok(())
    }

    /// `Ok(false)` when the trip is unknown; lookup failures requeue.
    async fn trip_exists(&self, trip_id: &str) -> Result<bool, HandlerError> {
        match self.trips.get_trip(trip_id).await {
            Ok(Some(_)) => Ok(true),
            Ok(None) => {
                warn!(trip_id = %trip_id, "Driver response for unknown trip, acking");
                Ok(false)
            }
            Err(e) => requeue_if_transient("load trip", trip_id, e).map(|()| false),
        }
    }
}

impl MessageHandler for TripResponseHandler {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let this = self.clone();
        Box::pin(async move { this.process(delivery).await })
    }
}
