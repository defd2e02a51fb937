//! Session gateway: WebSocket endpoints for drivers and riders plus the
//! rider-facing trip HTTP routes.
//!
//! ```text
//! rider  ──ws──► /ws/riders  ◄── notify_rider_* queues
//! driver ──ws──► /ws/drivers ◄── driver_cmd_trip_request
//!                     │
//!                     └── accept/decline ──► driver.cmd.trip_{accept,decline}
//! ```

mod frames;
mod http;
mod params;
mod sessions;

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::bus::MessageBroker;
use crate::clients::{DriverClient, TripClient};
use crate::session::SessionRegistry;

pub use frames::{parse_driver_frame, DriverFrame, FrameError};
pub use params::{DriverParams, RiderParams, ValidationError};
pub use sessions::{run_driver_session, run_rider_session, start_relays};

/// Shared state for every gateway route.
#[derive(Clone)]
pub struct GatewayState {
    pub registry: Arc<SessionRegistry>,
    pub broker: Arc<dyn MessageBroker>,
    pub trips: Arc<dyn TripClient>,
    pub drivers: Arc<dyn DriverClient>,
    /// Parent of every session's token; cancelled on shutdown.
    pub shutdown: CancellationToken,
}

/// Build the gateway router.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws/drivers", get(sessions::driver_ws))
        .route("/ws/riders", get(sessions::rider_ws))
        .route("/trip/preview", post(http::preview_trip))
        .route("/trip/start", post(http::start_trip))
        .route("/health", get(health))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Serve until `state.shutdown` is cancelled.
pub async fn serve(listener: tokio::net::TcpListener, state: GatewayState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!(addr = ?listener.local_addr().ok(), "Gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    let sessions = state.registry.len().await;
    match state.broker.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "healthy", "sessions": sessions})),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"status": "unhealthy", "error": e.to_string()})),
        ),
    }
}

#[cfg(test)]
mod tests;
