//! In-memory trip store for standalone mode and tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Result, StorageError, TripStore};
use crate::bus::outbox::{OutboxEntry, OutboxStore};
use crate::domain::{RideFare, TransitionOutcome, Trip, TripTransition};

#[derive(Default)]
struct State {
    fares: HashMap<String, RideFare>,
    trips: HashMap<String, Trip>,
    /// Insertion order is publish order.
    outbox: Vec<OutboxEntry>,
}

/// All state behind one lock, so multi-record writes are atomic.
#[derive(Default)]
pub struct InMemoryTripStore {
    state: RwLock<State>,
    unavailable: AtomicBool,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `Unavailable` until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("store marked unavailable".to_string()));
        }
        Ok(())
    }

    pub async fn outbox_len(&self) -> usize {
        self.state.read().await.outbox.len()
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn save_fares(&self, fares: &[RideFare]) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        for fare in fares {
            state.fares.insert(fare.id.clone(), fare.clone());
        }
        Ok(())
    }

    async fn get_fare(&self, fare_id: &str) -> Result<Option<RideFare>> {
        self.check_available()?;
        Ok(self.state.read().await.fares.get(fare_id).cloned())
    }

    async fn create_trip(&self, trip: &Trip, outbox: &[OutboxEntry]) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        state.trips.insert(trip.id.clone(), trip.clone());
        state.outbox.extend(outbox.iter().cloned());
        Ok(())
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>> {
        self.check_available()?;
        Ok(self.state.read().await.trips.get(trip_id).cloned())
    }

    async fn apply_transition(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<(Trip, TransitionOutcome)> {
        self.check_available()?;
        let mut state = self.state.write().await;
        let trip = state
            .trips
            .get_mut(trip_id)
            .ok_or_else(|| StorageError::trip_not_found(trip_id))?;
        let outcome = trip.apply(transition)?;
        Ok((trip.clone(), outcome))
    }
}

#[async_trait]
impl OutboxStore for InMemoryTripStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .await
            .outbox
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_dispatched(&self, id: &str) -> Result<()> {
        self.check_available()?;
        self.state.write().await.outbox.retain(|entry| entry.id != id);
        Ok(())
    }

    async fn record_dispatch_failure(&self, id: &str) -> Result<()> {
        self.check_available()?;
        let mut state = self.state.write().await;
        if let Some(entry) = state.outbox.iter_mut().find(|entry| entry.id == id) {
            entry.attempts += 1;
        }
        Ok(())
    }
}
