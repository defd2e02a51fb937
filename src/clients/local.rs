//! In-process clients over the service structs.

use std::sync::Arc;

use async_trait::async_trait;

use super::{DriverClient, Result, TripClient};
use crate::domain::{Coordinate, Driver, TransitionOutcome, Trip, TripTransition};
use crate::services::{DriverService, TripPreview, TripService};

pub struct LocalTripClient {
    service: Arc<TripService>,
}

impl LocalTripClient {
    pub fn new(service: Arc<TripService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl TripClient for LocalTripClient {
    async fn preview_trip(
        &self,
        user_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<TripPreview> {
        Ok(self.service.preview(user_id, pickup, destination).await?)
    }

    async fn create_trip(&self, fare_id: &str, user_id: &str) -> Result<String> {
        Ok(self.service.create_trip(fare_id, user_id).await?.id)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>> {
        Ok(self.service.get_trip(trip_id).await?)
    }

    async fn update_trip(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<TransitionOutcome> {
        let (_, outcome) = self.service.update_trip(trip_id, transition).await?;
        Ok(outcome)
    }
}

pub struct LocalDriverClient {
    service: Arc<DriverService>,
}

impl LocalDriverClient {
    pub fn new(service: Arc<DriverService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DriverClient for LocalDriverClient {
    async fn register_driver(&self, driver_id: &str, package_slug: &str) -> Result<Driver> {
        Ok(self.service.register(driver_id, package_slug).await?)
    }

    async fn unregister_driver(&self, driver_id: &str) -> Result<bool> {
        Ok(self.service.unregister(driver_id).await?)
    }
}
