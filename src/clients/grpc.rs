//! gRPC clients for remote trip and driver services.

use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Code;

use super::{ClientError, DriverClient, Result, TripClient};
use crate::domain::{Coordinate, Driver, Route, TransitionOutcome, Trip, TripTransition};
use crate::grpc::{connect_channel, fare_from_proto, transition_to_proto};
use crate::proto::driver_service_client::DriverServiceClient;
use crate::proto::trip_service_client::TripServiceClient;
use crate::proto::{
    CreateTripRequest, GetTripRequest, PreviewTripRequest, RegisterDriverRequest,
    UnregisterDriverRequest,
};
use crate::services::TripPreview;
use crate::utils::bootstrap::connect_with_retry;

#[derive(Clone)]
pub struct GrpcTripClient {
    client: TripServiceClient<Channel>,
}

impl GrpcTripClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: TripServiceClient::new(channel),
        }
    }

    /// Connect with startup backoff.
    pub async fn connect(address: &str) -> std::result::Result<Self, String> {
        let channel = connect_with_retry("trip", address, || connect_channel(address)).await?;
        Ok(Self::new(channel))
    }
}

#[async_trait]
impl TripClient for GrpcTripClient {
    async fn preview_trip(
        &self,
        user_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<TripPreview> {
        let response = self
            .client
            .clone()
            .preview_trip(PreviewTripRequest {
                user_id: user_id.to_string(),
                start_location: Some(pickup.into()),
                end_location: Some(destination.into()),
            })
            .await?
            .into_inner();

        let route: Route = response.route.map(Into::into).unwrap_or_default();
        let fares = response
            .ride_fares
            .into_iter()
            .map(|f| fare_from_proto(f, route.clone()))
            .collect();
        Ok(TripPreview { route, fares })
    }

    async fn create_trip(&self, fare_id: &str, user_id: &str) -> Result<String> {
        let response = self
            .client
            .clone()
            .create_trip(CreateTripRequest {
                ride_fare_id: fare_id.to_string(),
                user_id: user_id.to_string(),
            })
            .await?;
        Ok(response.into_inner().trip_id)
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>> {
        let result = self
            .client
            .clone()
            .get_trip(GetTripRequest {
                trip_id: trip_id.to_string(),
            })
            .await;

        match result {
            Ok(response) => response
                .into_inner()
                .trip
                .map(Trip::try_from)
                .transpose()
                .map_err(|status| ClientError::Internal(status.message().to_string())),
            Err(status) if status.code() == Code::NotFound => Ok(None),
            Err(status) => Err(status.into()),
        }
    }

    async fn update_trip(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<TransitionOutcome> {
        let response = self
            .client
            .clone()
            .update_trip(transition_to_proto(trip_id, transition))
            .await?;

        Ok(if response.into_inner().already_applied {
            TransitionOutcome::AlreadyApplied
        } else {
            TransitionOutcome::Applied
        })
    }
}

#[derive(Clone)]
pub struct GrpcDriverClient {
    client: DriverServiceClient<Channel>,
}

impl GrpcDriverClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            client: DriverServiceClient::new(channel),
        }
    }

    /// Connect with startup backoff.
    pub async fn connect(address: &str) -> std::result::Result<Self, String> {
        let channel = connect_with_retry("driver", address, || connect_channel(address)).await?;
        Ok(Self::new(channel))
    }
}

#[async_trait]
impl DriverClient for GrpcDriverClient {
    async fn register_driver(&self, driver_id: &str, package_slug: &str) -> Result<Driver> {
        let response = self
            .client
            .clone()
            .register_driver(RegisterDriverRequest {
                driver_id: driver_id.to_string(),
                package_slug: package_slug.to_string(),
            })
            .await?;

        response
            .into_inner()
            .driver
            .map(Into::into)
            .ok_or_else(|| ClientError::Internal("register response carried no driver".to_string()))
    }

    async fn unregister_driver(&self, driver_id: &str) -> Result<bool> {
        let response = self
            .client
            .clone()
            .unregister_driver(UnregisterDriverRequest {
                driver_id: driver_id.to_string(),
            })
            .await?;
        Ok(response.into_inner().removed)
    }
}
