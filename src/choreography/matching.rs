//! Driver selection for new and declined trips.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, info, warn};

use super::requeue_if_transient;
use crate::bus::{Delivery, Envelope, HandlerError, MessageBroker, MessageHandler, RoutingKey};
use crate::clients::{ClientError, TripClient};
use crate::domain::{Driver, Trip, TripEvent, TripTransition};
use crate::services::DriverRegistry;

/// Picks a driver for a trip from the tier's candidates.
pub trait SelectionPolicy: Send + Sync {
    fn select(&self, trip: &Trip, candidates: Vec<Driver>) -> Option<Driver>;
}

/// First registered driver whose tier matches the fare's.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstTierMatch;

impl SelectionPolicy for FirstTierMatch {
    fn select(&self, trip: &Trip, candidates: Vec<Driver>) -> Option<Driver> {
        candidates.into_iter().find(|d| d.serves(trip.tier()))
    }
}

/// Consumes `find_available_drivers`.
///
/// A match publishes `driver.cmd.trip_request` keyed by the driver; no match
/// publishes `trip.event.no_drivers_found` keyed by the rider. When a trip
/// client is attached the trip is moved to `no_driver` first.
#[derive(Clone)]
pub struct TripMatcher {
    drivers: Arc<dyn DriverRegistry>,
    broker: Arc<dyn MessageBroker>,
    policy: Arc<dyn SelectionPolicy>,
    trips: Option<Arc<dyn TripClient>>,
}

impl TripMatcher {
    pub fn new(drivers: Arc<dyn DriverRegistry>, broker: Arc<dyn MessageBroker>) -> Self {
        Self {
            drivers,
            broker,
            policy: Arc::new(FirstTierMatch),
            trips: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn SelectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Record `no_driver` on the trip before notifying the rider.
    pub fn with_trip_client(mut self, trips: Arc<dyn TripClient>) -> Self {
        self.trips = Some(trips);
        self
    }

    async fn process(&self, delivery: Delivery) -> Result<(), HandlerError> {
        let event: TripEvent = match delivery.envelope.decode_json() {
            Ok(event) => event,
            Err(e) => {
                warn!(routing_key = %delivery.routing_key, error = %e, "Dropping undecodable trip event");
                return Ok(());
            }
        };
        let trip = event.trip;

        let candidates = self.drivers.find_by_tier(trip.tier()).await;
        debug!(trip_id = %trip.id, tier = %trip.tier(), candidates = candidates.len(), "Matching trip");

        match self.policy.select(&trip, candidates) {
            Some(driver) => {
                let envelope = Envelope::json(&driver.id, &TripEvent { trip: trip.clone() })?;
                self.broker.publish(RoutingKey::TripRequest, &envelope).await?;
                info!(trip_id = %trip.id, driver_id = %driver.id, "Trip offered to driver");
            }
            None => {
                if let Some(trips) = &self.trips {
                    match trips.update_trip(&trip.id, TripTransition::NoDriver).await {
                        Ok(_) => {}
                        Err(ClientError::NotFound(_)) => {
                            warn!(trip_id = %trip.id, rider_id = %trip.user_id, "Trip not found, rider not notified");
                            return Ok(());
                        }
                        Err(e) => return requeue_if_transient("mark no_driver", &trip.id, e),
                    }
                }
                let envelope = Envelope::json(&trip.user_id, &TripEvent { trip: trip.clone() })?;
                self.broker.publish(RoutingKey::NoDriversFound, &envelope).await?;
                info!(trip_id = %trip.id, tier = %trip.tier(), rider_id = %trip.user_id, "No drivers found");
            }
        }
        Ok(())
    }
}

impl MessageHandler for TripMatcher {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, Result<(), HandlerError>> {
        let this = self.clone();
        Box::pin(async move { this.process(delivery).await })
    }
}
