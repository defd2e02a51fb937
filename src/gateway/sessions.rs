//! WebSocket session lifecycle.
//!
//! Connecting → Upgraded → Registered → Active → Closing → Closed. Query
//! parameters are validated before the upgrade so a bad request allocates
//! nothing. Each session gets a child cancellation token that stops its
//! broker consumers when the session ends. `start_relays` adds consumers
//! that live as long as the gateway itself.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use futures::stream::SplitStream;
use futures::{future, Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::frames::{parse_driver_frame, DriverFrame};
use super::params::{DriverParams, RiderParams};
use super::GatewayState;
use crate::bus::{BrokerError, Envelope, Queue, RoutingKey};
use crate::clients::ClientError;
use crate::domain::DriverTripResponse;
use crate::session::{RegistryError, SessionMessage, SessionRelay, SessionSink, WsSink};

const DRIVER_QUEUES: [Queue; 1] = [Queue::DriverCmdTripRequest];
const RIDER_QUEUES: [Queue; 2] = [Queue::NotifyNoDriversFound, Queue::NotifyDriverAssigned];

#[derive(Debug, thiserror::Error)]
enum SessionError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error("failed to encode driver record: {0}")]
    Encode(#[from] serde_json::Error),
}

type TextFrames = Pin<Box<dyn Stream<Item = String> + Send>>;

/// Text frames until the peer closes or the read fails.
fn text_frames(stream: SplitStream<WebSocket>) -> TextFrames {
    Box::pin(
        stream
            .take_while(|msg| {
                if let Err(e) = msg {
                    debug!(error = %e, "WebSocket read failed");
                }
                future::ready(matches!(msg, Ok(m) if !matches!(m, Message::Close(_))))
            })
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(text.to_string()),
                    _ => None,
                })
            }),
    )
}

pub(super) async fn driver_ws(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let params = match DriverParams::from_query(&query) {
        Ok(params) => params,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = socket.split();
        run_driver_session(state, params, Box::new(WsSink::new(tx)), text_frames(rx)).await;
    })
}

pub(super) async fn rider_ws(
    State(state): State<GatewayState>,
    Query(query): Query<HashMap<String, String>>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let params = match RiderParams::from_query(&query) {
        Ok(params) => params,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.on_upgrade(move |socket| async move {
        let (tx, rx) = socket.split();
        run_rider_session(state, params, Box::new(WsSink::new(tx)), text_frames(rx)).await;
    })
}

async fn subscribe(
    state: &GatewayState,
    queues: &[Queue],
    role: &'static str,
    token: &CancellationToken,
) -> Result<(), BrokerError> {
    let relay = Arc::new(SessionRelay::new(Arc::clone(&state.registry), role));
    for queue in queues {
        state
            .broker
            .consume(*queue, relay.clone(), token.clone())
            .await?;
    }
    Ok(())
}

/// Attach gateway-lifetime consumers to every session queue.
///
/// They run alongside the per-session consumers until `state.shutdown` and
/// settle envelopes whose owner has no live session, so those never pile up
/// in a queue nobody reads.
pub async fn start_relays(state: &GatewayState) -> Result<(), BrokerError> {
    subscribe(state, &DRIVER_QUEUES, "driver", &state.shutdown).await?;
    subscribe(state, &RIDER_QUEUES, "rider", &state.shutdown).await?;
    info!("Gateway relays attached");
    Ok(())
}

async fn register_driver(state: &GatewayState, params: &DriverParams) -> Result<(), SessionError> {
    let driver = state
        .drivers
        .register_driver(&params.user_id, &params.package_slug)
        .await?;
    let message = SessionMessage::new(
        RoutingKey::DriverRegister.as_str(),
        serde_json::to_value(&driver)?,
    );
    state.registry.send_message(&params.user_id, &message).await?;
    Ok(())
}

/// Drive one driver connection from registration to cleanup.
pub async fn run_driver_session<S>(
    state: GatewayState,
    params: DriverParams,
    sink: Box<dyn SessionSink>,
    mut inbound: S,
) where
    S: Stream<Item = String> + Unpin + Send,
{
    let driver_id = params.user_id.clone();
    let session_id = match state.registry.add(&driver_id, sink).await {
        Ok(id) => id,
        Err(e) => {
            warn!(driver_id = %driver_id, error = %e, "Driver session refused");
            return;
        }
    };
    let token = state.shutdown.child_token();

    let active = async {
        register_driver(&state, &params).await?;
        subscribe(&state, &DRIVER_QUEUES, "driver", &token).await?;
        Ok::<_, SessionError>(())
    }
    .await;

    match active {
        Ok(()) => {
            info!(driver_id = %driver_id, package_slug = %params.package_slug, "Driver session active");
            loop {
                let text = tokio::select! {
                    _ = token.cancelled() => break,
                    next = inbound.next() => match next {
                        Some(text) => text,
                        None => break,
                    },
                };
                handle_driver_frame(&state, &driver_id, &text).await;
            }
        }
        Err(e) => {
            error!(driver_id = %driver_id, error = %e, "Driver session setup failed");
        }
    }

    token.cancel();
    if state.registry.remove_session(&driver_id, session_id).await {
        if let Err(e) = state.drivers.unregister_driver(&driver_id).await {
            warn!(driver_id = %driver_id, error = %e, "Failed to unregister driver");
        }
    }
    info!(driver_id = %driver_id, "Driver session closed");
}

/// Drive one rider connection. Riders only receive; inbound frames are logged.
pub async fn run_rider_session<S>(
    state: GatewayState,
    params: RiderParams,
    sink: Box<dyn SessionSink>,
    mut inbound: S,
) where
    S: Stream<Item = String> + Unpin + Send,
{
    let rider_id = params.user_id;
    let session_id = match state.registry.add(&rider_id, sink).await {
        Ok(id) => id,
        Err(e) => {
            warn!(rider_id = %rider_id, error = %e, "Rider session refused");
            return;
        }
    };
    let token = state.shutdown.child_token();

    match subscribe(&state, &RIDER_QUEUES, "rider", &token).await {
        Ok(()) => {
            info!(rider_id = %rider_id, "Rider session active");
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = inbound.next() => match next {
                        Some(text) => debug!(rider_id = %rider_id, frame = %text, "Rider frame ignored"),
                        None => break,
                    },
                }
            }
        }
        Err(e) => {
            error!(rider_id = %rider_id, error = %e, "Rider session setup failed");
        }
    }

    token.cancel();
    state.registry.remove_session(&rider_id, session_id).await;
    info!(rider_id = %rider_id, "Rider session closed");
}

async fn handle_driver_frame(state: &GatewayState, driver_id: &str, text: &str) {
    match parse_driver_frame(text) {
        Ok(DriverFrame::Location) => {
            debug!(driver_id = %driver_id, "Location update discarded");
        }
        Ok(DriverFrame::Accept(response)) => {
            republish(state, driver_id, RoutingKey::TripAccept, response).await;
        }
        Ok(DriverFrame::Decline(response)) => {
            republish(state, driver_id, RoutingKey::TripDecline, response).await;
        }
        Ok(DriverFrame::Unknown(tag)) => {
            warn!(driver_id = %driver_id, frame_type = %tag, "Unknown driver frame type");
        }
        Err(e) => {
            warn!(driver_id = %driver_id, error = %e, "Dropping malformed driver frame");
        }
    }
}

/// Publish a driver's decision keyed by the rider it concerns.
///
/// The decision is attributed to the session's driver whatever id the frame
/// carried.
async fn republish(
    state: &GatewayState,
    driver_id: &str,
    key: RoutingKey,
    mut response: DriverTripResponse,
) {
    if response.driver.id != driver_id {
        warn!(driver_id = %driver_id, claimed = %response.driver.id, "Driver frame carried a foreign id");
        response.driver.id = driver_id.to_string();
    }
    let published = match Envelope::json(&response.rider_id, &response) {
        Ok(envelope) => state.broker.publish(key, &envelope).await,
        Err(e) => Err(e),
    };

    match published {
        Ok(()) => {
            info!(driver_id = %driver_id, trip_id = %response.trip_id, rider_id = %response.rider_id, routing_key = %key, "Driver decision published");
        }
        Err(e) => {
            error!(driver_id = %driver_id, trip_id = %response.trip_id, routing_key = %key, error = %e, "Failed to publish driver decision");
        }
    }
}
