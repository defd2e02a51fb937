use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures::channel::mpsc;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use super::*;
use crate::bus::{ChannelBroker, Envelope, Queue, RoutingKey};
use crate::clients::{LocalDriverClient, LocalTripClient};
use crate::domain::{Coordinate, PricingConfig, StraightLineRouteProvider};
use crate::services::{DriverRegistry, DriverService, LinearDriverRegistry, TripService};
use crate::session::{DuplicateSessionPolicy, SessionMessage};
use crate::storage::InMemoryTripStore;
use crate::test_utils::{eventually, ChannelSink, RecordingHandler};

struct Harness {
    state: GatewayState,
    broker: Arc<ChannelBroker>,
    drivers: Arc<LinearDriverRegistry>,
}

fn harness_with(policy: DuplicateSessionPolicy) -> Harness {
    let broker = Arc::new(ChannelBroker::new());
    let drivers = Arc::new(LinearDriverRegistry::new());
    let trips = TripService::new(
        Arc::new(InMemoryTripStore::new()),
        Arc::new(StraightLineRouteProvider::default()),
        PricingConfig::default(),
    );

    let state = GatewayState {
        registry: Arc::new(SessionRegistry::new(policy)),
        broker: broker.clone(),
        trips: Arc::new(LocalTripClient::new(Arc::new(trips))),
        drivers: Arc::new(LocalDriverClient::new(Arc::new(DriverService::new(
            drivers.clone(),
        )))),
        shutdown: CancellationToken::new(),
    };

    Harness {
        state,
        broker,
        drivers,
    }
}

fn harness() -> Harness {
    harness_with(DuplicateSessionPolicy::Replace)
}

async fn call(state: GatewayState, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn next_frame(rx: &mut UnboundedReceiver<String>) -> SessionMessage {
    let text = tokio::time::timeout(std::time::Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("sink closed");
    serde_json::from_str(&text).unwrap()
}

fn driver_params(id: &str, tier: &str) -> DriverParams {
    DriverParams {
        user_id: id.to_string(),
        package_slug: tier.to_string(),
    }
}

// ============================================================================
// Connection validation
// ============================================================================

#[tokio::test]
async fn test_driver_without_package_slug_is_rejected() {
    let h = harness();
    let (status, body) = call(h.state.clone(), get("/ws/drivers?userID=d1")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "packageSlug is required");
    assert!(h.state.registry.is_empty().await);
    assert!(h.drivers.is_empty().await);
}

#[tokio::test]
async fn test_rider_without_user_is_rejected() {
    let h = harness();
    let (status, _) = call(h.state.clone(), get("/ws/riders")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(h.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_valid_params_without_upgrade_allocate_nothing() {
    let h = harness();
    let (status, _) = call(
        h.state.clone(),
        get("/ws/drivers?userID=d1&packageSlug=sedan"),
    )
    .await;

    assert!(status.is_client_error());
    assert!(h.state.registry.is_empty().await);
    assert!(h.drivers.is_empty().await);
}

// ============================================================================
// HTTP routes
// ============================================================================

#[tokio::test]
async fn test_preview_then_start() {
    let h = harness();
    let (status, body) = call(
        h.state.clone(),
        post_json(
            "/trip/preview",
            json!({
                "userID": "rider-1",
                "pickup": {"latitude": 37.7749, "longitude": -122.4194},
                "destination": {"latitude": 37.8024, "longitude": -122.4058},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let body: Value = serde_json::from_slice(&body).unwrap();
    let fares = body["data"]["rideFares"].as_array().unwrap();
    assert_eq!(fares.len(), PricingConfig::default().packages.len());
    assert!(body["data"]["route"]["distance"].as_f64().unwrap() > 0.0);
    let fare_id = fares[0]["id"].as_str().unwrap().to_string();

    let (status, body) = call(
        h.state.clone(),
        post_json(
            "/trip/start",
            json!({"rideFareID": fare_id, "userID": "rider-1"}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert!(!body["data"]["tripID"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn test_preview_requires_user() {
    let h = harness();
    let (status, _) = call(
        h.state,
        post_json(
            "/trip/preview",
            json!({
                "pickup": {"latitude": 1.0, "longitude": 1.0},
                "destination": {"latitude": 2.0, "longitude": 2.0},
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preview_rejects_malformed_json() {
    let h = harness();
    let request = Request::builder()
        .method("POST")
        .uri("/trip/preview")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, _) = call(h.state, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_unknown_fare_is_generic_500() {
    let h = harness();
    let (status, body) = call(
        h.state,
        post_json("/trip/start", json!({"rideFareID": "nope", "userID": "rider-1"})),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = String::from_utf8(body).unwrap();
    assert_eq!(body, "failed to create trip");
}

#[tokio::test]
async fn test_health_follows_broker() {
    let h = harness();
    let (status, body) = call(h.state.clone(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["status"], "healthy");

    h.broker.close().await.unwrap();
    let (status, _) = call(h.state, get("/health")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Session lifecycle
// ============================================================================

#[tokio::test]
async fn test_driver_session_lifecycle() {
    let h = harness();
    let (sink, mut frames) = ChannelSink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();

    let session = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(sink),
        inbound_rx,
    ));

    let registered = next_frame(&mut frames).await;
    assert_eq!(registered.message_type, "driver.cmd.register");
    assert_eq!(registered.data["id"], "d1");
    assert_eq!(registered.data["packageSlug"], "sedan");
    assert_eq!(h.drivers.find_by_tier("sedan").await.len(), 1);

    h.broker
        .publish(
            RoutingKey::TripRequest,
            &Envelope::json("d1", &json!({"trip": {"id": "t1"}})).unwrap(),
        )
        .await
        .unwrap();
    let request = next_frame(&mut frames).await;
    assert_eq!(request.message_type, "driver.cmd.trip_request");
    assert_eq!(request.data["trip"]["id"], "t1");

    let responses = RecordingHandler::new();
    h.broker
        .consume(
            Queue::DriverTripResponse,
            Arc::new(responses.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let accept = json!({
        "type": "driver.cmd.trip_accept",
        "data": {"tripID": "t1", "riderID": "rider-1", "driver": registered.data},
    });
    inbound_tx.unbounded_send(accept.to_string()).unwrap();
    inbound_tx
        .unbounded_send(json!({"type": "driver.cmd.location", "data": {}}).to_string())
        .unwrap();
    inbound_tx.unbounded_send("garbage".to_string()).unwrap();

    assert!(eventually(|| async { responses.deliveries().await.len() == 1 }).await);
    let delivery = &responses.deliveries().await[0];
    assert_eq!(delivery.routing_key, RoutingKey::TripAccept);
    assert_eq!(delivery.envelope.owner_id, "rider-1");
    let payload: Value = delivery.envelope.decode_json().unwrap();
    assert_eq!(payload["tripID"], "t1");
    assert_eq!(payload["driver"]["id"], "d1");

    drop(inbound_tx);
    session.await.unwrap();

    assert!(h.state.registry.is_empty().await);
    assert!(h.drivers.is_empty().await);
}

#[tokio::test]
async fn test_driver_decline_is_republished() {
    let h = harness();
    let (sink, mut frames) = ChannelSink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
    let session = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(sink),
        inbound_rx,
    ));
    let registered = next_frame(&mut frames).await;

    let responses = RecordingHandler::new();
    h.broker
        .consume(
            Queue::DriverTripResponse,
            Arc::new(responses.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let decline = json!({
        "type": "driver.cmd.trip_decline",
        "data": {"tripID": "t9", "riderID": "rider-9", "driver": registered.data},
    });
    inbound_tx.unbounded_send(decline.to_string()).unwrap();

    assert!(eventually(|| async { responses.deliveries().await.len() == 1 }).await);
    let delivery = &responses.deliveries().await[0];
    assert_eq!(delivery.routing_key, RoutingKey::TripDecline);
    assert_eq!(delivery.envelope.owner_id, "rider-9");

    drop(inbound_tx);
    session.await.unwrap();
}

#[tokio::test]
async fn test_driver_decision_carries_session_driver_id() {
    let h = harness();
    let (sink, mut frames) = ChannelSink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
    let session = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(sink),
        inbound_rx,
    ));
    let mut claimed = next_frame(&mut frames).await.data;
    claimed["id"] = json!("d2");

    let responses = RecordingHandler::new();
    h.broker
        .consume(
            Queue::DriverTripResponse,
            Arc::new(responses.clone()),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let accept = json!({
        "type": "driver.cmd.trip_accept",
        "data": {"tripID": "t1", "riderID": "rider-1", "driver": claimed},
    });
    inbound_tx.unbounded_send(accept.to_string()).unwrap();

    assert!(eventually(|| async { responses.deliveries().await.len() == 1 }).await);
    let payload: Value = responses.deliveries().await[0].envelope.decode_json().unwrap();
    assert_eq!(payload["driver"]["id"], "d1");

    drop(inbound_tx);
    session.await.unwrap();
}

#[tokio::test]
async fn test_relays_settle_notifications_without_sessions() {
    let h = harness();
    start_relays(&h.state).await.unwrap();

    for (key, owner) in [
        (RoutingKey::DriverAssigned, "rider-1"),
        (RoutingKey::NoDriversFound, "rider-2"),
        (RoutingKey::TripRequest, "d1"),
    ] {
        h.broker
            .publish(key, &Envelope::json(owner, &json!({"trip": {"id": "t1"}})).unwrap())
            .await
            .unwrap();
    }

    for queue in [
        Queue::NotifyDriverAssigned,
        Queue::NotifyNoDriversFound,
        Queue::DriverCmdTripRequest,
    ] {
        let broker = h.broker.clone();
        assert!(eventually(|| {
            let broker = broker.clone();
            async move { broker.pending(queue).await == 0 }
        })
        .await);
    }

    h.state.shutdown.cancel();
}

#[tokio::test]
async fn test_rider_receives_only_own_notifications() {
    let h = harness();
    let (sink, mut frames) = ChannelSink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
    let session = tokio::spawn(run_rider_session(
        h.state.clone(),
        RiderParams {
            user_id: "rider-1".to_string(),
        },
        Box::new(sink),
        inbound_rx,
    ));
    assert!(eventually(|| async { h.state.registry.contains("rider-1").await }).await);

    h.broker
        .publish(
            RoutingKey::NoDriversFound,
            &Envelope::json("rider-2", &json!({"tripID": "other"})).unwrap(),
        )
        .await
        .unwrap();
    h.broker
        .publish(
            RoutingKey::DriverAssigned,
            &Envelope::json("rider-1", &json!({"trip": {"id": "t1"}})).unwrap(),
        )
        .await
        .unwrap();

    let frame = next_frame(&mut frames).await;
    assert_eq!(frame.message_type, "trip.event.driver_assigned");
    assert_eq!(frame.data["trip"]["id"], "t1");

    inbound_tx.unbounded_send("hello".to_string()).unwrap();
    drop(inbound_tx);
    session.await.unwrap();

    assert!(frames.try_recv().is_err());
    assert!(h.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_shutdown_ends_sessions() {
    let h = harness();
    let (sink, _frames) = ChannelSink::new();
    let (_inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
    let session = tokio::spawn(run_rider_session(
        h.state.clone(),
        RiderParams {
            user_id: "rider-1".to_string(),
        },
        Box::new(sink),
        inbound_rx,
    ));
    assert!(eventually(|| async { h.state.registry.contains("rider-1").await }).await);

    h.state.shutdown.cancel();

    tokio::time::timeout(std::time::Duration::from_secs(2), session)
        .await
        .unwrap()
        .unwrap();
    assert!(h.state.registry.is_empty().await);
}

#[tokio::test]
async fn test_replaced_driver_session_keeps_registration() {
    let h = harness_with(DuplicateSessionPolicy::Replace);

    let (first_sink, mut first_frames) = ChannelSink::new();
    let (first_tx, first_rx) = mpsc::unbounded::<String>();
    let first = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(first_sink),
        first_rx,
    ));
    next_frame(&mut first_frames).await;

    let (second_sink, mut second_frames) = ChannelSink::new();
    let (second_tx, second_rx) = mpsc::unbounded::<String>();
    let second = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "suv"),
        Box::new(second_sink),
        second_rx,
    ));
    next_frame(&mut second_frames).await;

    drop(first_tx);
    first.await.unwrap();

    assert!(h.state.registry.contains("d1").await);
    assert_eq!(h.drivers.find_by_tier("suv").await.len(), 1);

    drop(second_tx);
    second.await.unwrap();
    assert!(h.drivers.is_empty().await);
}

#[tokio::test]
async fn test_reject_policy_refuses_second_driver() {
    let h = harness_with(DuplicateSessionPolicy::Reject);

    let (first_sink, mut first_frames) = ChannelSink::new();
    let (first_tx, first_rx) = mpsc::unbounded::<String>();
    let first = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(first_sink),
        first_rx,
    ));
    next_frame(&mut first_frames).await;

    let (second_sink, _second_frames) = ChannelSink::new();
    let (_second_tx, second_rx) = mpsc::unbounded::<String>();
    run_driver_session(
        h.state.clone(),
        driver_params("d1", "suv"),
        Box::new(second_sink),
        second_rx,
    )
    .await;

    assert_eq!(h.drivers.find_by_tier("sedan").await.len(), 1);
    assert!(h.drivers.find_by_tier("suv").await.is_empty());

    drop(first_tx);
    first.await.unwrap();
}

#[tokio::test]
async fn test_non_decision_frames_are_not_published() {
    let h = harness();
    let (sink, mut frames) = ChannelSink::new();
    let (inbound_tx, inbound_rx) = mpsc::unbounded::<String>();
    let session = tokio::spawn(run_driver_session(
        h.state.clone(),
        driver_params("d1", "sedan"),
        Box::new(sink),
        inbound_rx,
    ));
    next_frame(&mut frames).await;

    let location = json!({
        "type": "driver.cmd.location",
        "data": Coordinate::new(1.0, 2.0),
    });
    inbound_tx.unbounded_send(location.to_string()).unwrap();
    inbound_tx
        .unbounded_send(json!({"type": "driver.cmd.wave"}).to_string())
        .unwrap();
    drop(inbound_tx);
    session.await.unwrap();

    assert_eq!(h.broker.pending(Queue::DriverTripResponse).await, 0);
}
