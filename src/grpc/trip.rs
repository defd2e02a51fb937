//! TripService gRPC server.

use std::sync::Arc;

use tonic::{Request, Response, Status};
use tracing::debug;

use super::convert::transition_from_proto;
use crate::domain::{Coordinate, TransitionOutcome};
use crate::proto::trip_service_server::TripService as TripServiceRpc;
use crate::proto::{
    CreateTripRequest, CreateTripResponse, GetTripRequest, GetTripResponse, PreviewTripRequest,
    PreviewTripResponse, UpdateTripRequest, UpdateTripResponse,
};
use crate::services::TripService;

/// Serves `ridehail.TripService` over a shared `TripService`.
pub struct TripGrpcServer {
    service: Arc<TripService>,
}

impl TripGrpcServer {
    pub fn new(service: Arc<TripService>) -> Self {
        Self { service }
    }
}

fn required(location: Option<crate::proto::Coordinate>, field: &str) -> Result<Coordinate, Status> {
    location
        .map(Into::into)
        .ok_or_else(|| Status::invalid_argument(format!("{field} is required")))
}

#[tonic::async_trait]
impl TripServiceRpc for TripGrpcServer {
    async fn preview_trip(
        &self,
        request: Request<PreviewTripRequest>,
    ) -> Result<Response<PreviewTripResponse>, Status> {
        let req = request.into_inner();
        let pickup = required(req.start_location, "start_location")?;
        let destination = required(req.end_location, "end_location")?;

        let preview = self
            .service
            .preview(&req.user_id, pickup, destination)
            .await?;

        Ok(Response::new(PreviewTripResponse {
            route: Some(preview.route.into()),
            ride_fares: preview.fares.into_iter().map(Into::into).collect(),
        }))
    }

    async fn create_trip(
        &self,
        request: Request<CreateTripRequest>,
    ) -> Result<Response<CreateTripResponse>, Status> {
        let req = request.into_inner();
        if req.ride_fare_id.is_empty() {
            return Err(Status::invalid_argument("ride_fare_id is required"));
        }

        let trip = self
            .service
            .create_trip(&req.ride_fare_id, &req.user_id)
            .await?;

        Ok(Response::new(CreateTripResponse { trip_id: trip.id }))
    }

    async fn get_trip(
        &self,
        request: Request<GetTripRequest>,
    ) -> Result<Response<GetTripResponse>, Status> {
        let trip_id = request.into_inner().trip_id;
        let trip = self
            .service
            .get_trip(&trip_id)
            .await?
            .ok_or_else(|| Status::not_found(format!("trip not found: {trip_id}")))?;

        Ok(Response::new(GetTripResponse {
            trip: Some(trip.into()),
        }))
    }

    async fn update_trip(
        &self,
        request: Request<UpdateTripRequest>,
    ) -> Result<Response<UpdateTripResponse>, Status> {
        let req = request.into_inner();
        let transition = transition_from_proto(&req.status, req.driver)?;

        let (_, outcome) = self.service.update_trip(&req.trip_id, transition).await?;
        debug!(trip_id = %req.trip_id, ?outcome, "UpdateTrip served");

        Ok(Response::new(UpdateTripResponse {
            already_applied: outcome == TransitionOutcome::AlreadyApplied,
        }))
    }
}
