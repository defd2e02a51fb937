//! Rider-facing trip routes.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::GatewayState;
use crate::clients::ClientError;
use crate::domain::{Coordinate, RideFare, Route};

#[derive(Debug, Deserialize)]
pub(super) struct PreviewTripRequest {
    #[serde(rename = "userID", default)]
    user_id: String,
    pickup: Coordinate,
    destination: Coordinate,
}

#[derive(Debug, Deserialize)]
pub(super) struct StartTripRequest {
    #[serde(rename = "rideFareID", default)]
    ride_fare_id: String,
    #[serde(rename = "userID", default)]
    user_id: String,
}

#[derive(Debug, Serialize)]
struct PreviewTripResponse {
    route: Route,
    #[serde(rename = "rideFares")]
    ride_fares: Vec<RideFare>,
}

#[derive(Debug, Serialize)]
struct StartTripResponse {
    #[serde(rename = "tripID")]
    trip_id: String,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T> {
    data: T,
}

fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

fn client_failure(action: &str, e: ClientError) -> Response {
    error!(action, error = %e, "Trip service call failed");
    (StatusCode::INTERNAL_SERVER_ERROR, format!("failed to {action}")).into_response()
}

pub(super) async fn preview_trip(
    State(state): State<GatewayState>,
    body: Result<Json<PreviewTripRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(_) => return bad_request("failed to parse JSON data"),
    };
    if req.user_id.is_empty() {
        return bad_request("userID is required");
    }

    match state
        .trips
        .preview_trip(&req.user_id, req.pickup, req.destination)
        .await
    {
        Ok(preview) => created(PreviewTripResponse {
            route: preview.route,
            ride_fares: preview.fares,
        }),
        Err(e) => client_failure("preview trip", e),
    }
}

pub(super) async fn start_trip(
    State(state): State<GatewayState>,
    body: Result<Json<StartTripRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match body {
        Ok(body) => body,
        Err(_) => return bad_request("failed to parse JSON data"),
    };

    match state.trips.create_trip(&req.ride_fare_id, &req.user_id).await {
        Ok(trip_id) => created(StartTripResponse { trip_id }),
        Err(e) => client_failure("create trip", e),
    }
}
