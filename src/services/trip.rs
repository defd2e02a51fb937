//! Trip lifecycle: preview, create, lookup, state transitions.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, info};

use crate::bus::outbox::OutboxEntry;
use crate::bus::{BrokerError, Envelope, RoutingKey};
use crate::domain::{
    estimate_fares, Coordinate, PricingConfig, RideFare, Route, RouteError, RouteProvider,
    TransitionError, TransitionOutcome, Trip, TripEvent, TripTransition,
};
use crate::storage::{StorageError, TripStore};

#[derive(Debug, thiserror::Error)]
pub enum TripError {
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("fare not found: {0}")]
    FareNotFound(String),
    #[error("fare {fare_id} does not belong to user {user_id}")]
    FareOwnership { fare_id: String, user_id: String },
    #[error("trip not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Transition(#[from] TransitionError),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("encode failed: {0}")]
    Encode(#[from] BrokerError),
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for TripError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound { id, .. } => TripError::NotFound(id),
            StorageError::Transition(e) => TripError::Transition(e),
            other => TripError::Storage(other),
        }
    }
}

/// Route plus one fare per package.
#[derive(Debug, Clone, PartialEq)]
pub struct TripPreview {
    pub route: Route,
    pub fares: Vec<RideFare>,
}

pub struct TripService {
    store: Arc<dyn TripStore>,
    routes: Arc<dyn RouteProvider>,
    pricing: PricingConfig,
    outbox_signal: Option<Arc<Notify>>,
}

impl TripService {
    pub fn new(
        store: Arc<dyn TripStore>,
        routes: Arc<dyn RouteProvider>,
        pricing: PricingConfig,
    ) -> Self {
        Self {
            store,
            routes,
            pricing,
            outbox_signal: None,
        }
    }

    /// Wake the outbox relay after each write.
    pub fn with_outbox_signal(mut self, signal: Arc<Notify>) -> Self {
        self.outbox_signal = Some(signal);
        self
    }

    /// Price every package for the route and remember the fares for `create_trip`.
    pub async fn preview(
        &self,
        user_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<TripPreview, TripError> {
        if user_id.is_empty() {
            return Err(TripError::Invalid("user id is required".to_string()));
        }

        let route = self.routes.route(pickup, destination).await?;
        let fares = estimate_fares(user_id, &route, &self.pricing);
        self.store.save_fares(&fares).await?;

        debug!(user_id = %user_id, fares = fares.len(), distance = route.distance, "Trip previewed");
        Ok(TripPreview { route, fares })
    }

    /// Persist a trip for a previewed fare together with its `trip.event.created`
    /// outbox entry. Nothing is published here.
    pub async fn create_trip(&self, fare_id: &str, user_id: &str) -> Result<Trip, TripError> {
        let fare = self
            .store
            .get_fare(fare_id)
            .await?
            .ok_or_else(|| TripError::FareNotFound(fare_id.to_string()))?;

        if fare.user_id != user_id {
            return Err(TripError::FareOwnership {
                fare_id: fare_id.to_string(),
                user_id: user_id.to_string(),
            });
        }

        let trip = Trip::from_fare(fare);
        let envelope = Envelope::json(&trip.user_id, &TripEvent { trip: trip.clone() })?;
        let entry = OutboxEntry::new(RoutingKey::TripCreated, envelope);

        self.store.create_trip(&trip, &[entry]).await?;
        if let Some(signal) = &self.outbox_signal {
            signal.notify_one();
        }

        info!(trip_id = %trip.id, user_id = %trip.user_id, tier = %trip.tier(), "Trip created");
        Ok(trip)
    }

    pub async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>, TripError> {
        Ok(self.store.get_trip(trip_id).await?)
    }

    pub async fn update_trip(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<(Trip, TransitionOutcome), TripError> {
        let target = transition.target();
        let (trip, outcome) = self.store.apply_transition(trip_id, transition).await?;
        info!(trip_id = %trip_id, status = %target, ?outcome, "Trip updated");
        Ok((trip, outcome))
    }
}
