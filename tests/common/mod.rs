//! Shared harness for the choreography integration tests.
//!
//! Wires every service into one process over the channel broker, the way
//! `ridehail-standalone` does, and drives sessions through channel-backed
//! sinks instead of real sockets.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc as inbound;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ridehail::bus::{
    BrokerError, ChannelBroker, Envelope, MessageBroker, MessageHandler, OutboxConfig,
    OutboxRelay, Queue, RelayHandle, RoutingKey,
};
use ridehail::choreography::{TripMatcher, TripResponseHandler};
use ridehail::clients::{LocalDriverClient, LocalTripClient, TripClient};
use ridehail::domain::{Coordinate, Driver, PricingConfig, StraightLineRouteProvider, Trip};
use ridehail::gateway::{
    run_driver_session, run_rider_session, start_relays, DriverParams, GatewayState, RiderParams,
};
use ridehail::services::{DriverService, LinearDriverRegistry, TripService};
use ridehail::session::{DuplicateSessionPolicy, SessionMessage, SessionRegistry, SessionSink, SinkError};
use ridehail::storage::InMemoryTripStore;

pub const WAIT: Duration = Duration::from_secs(3);

/// Channel broker whose publishes can be made to fail.
pub struct FlakyBroker {
    inner: ChannelBroker,
    failing: AtomicBool,
}

impl FlakyBroker {
    pub fn new() -> Self {
        Self {
            inner: ChannelBroker::new(),
            failing: AtomicBool::new(false),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn pending(&self, queue: Queue) -> usize {
        self.inner.pending(queue).await
    }
}

#[async_trait]
impl MessageBroker for FlakyBroker {
    async fn publish(&self, key: RoutingKey, envelope: &Envelope) -> ridehail::bus::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrokerError::Publish("broker unavailable".to_string()));
        }
        self.inner.publish(key, envelope).await
    }

    async fn consume(
        &self,
        queue: Queue,
        handler: Arc<dyn MessageHandler>,
        shutdown: CancellationToken,
    ) -> ridehail::bus::Result<()> {
        self.inner.consume(queue, handler, shutdown).await
    }

    async fn health_check(&self) -> ridehail::bus::Result<()> {
        self.inner.health_check().await
    }

    async fn close(&self) -> ridehail::bus::Result<()> {
        self.inner.close().await
    }
}

/// Session sink feeding a channel the test reads from.
pub struct TestSink {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SessionSink for TestSink {
    async fn send_text(&mut self, text: String) -> Result<(), SinkError> {
        self.tx
            .send(text)
            .map_err(|_| SinkError("test receiver dropped".to_string()))
    }

    async fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A connected client: frames pushed to it and a handle to send frames up.
pub struct TestSession {
    frames: mpsc::UnboundedReceiver<String>,
    inbound: inbound::UnboundedSender<String>,
    task: JoinHandle<()>,
    registered: Option<Driver>,
}

impl TestSession {
    /// The record sent in a driver session's registration message.
    pub fn driver(&self) -> Driver {
        self.registered.clone().expect("not a driver session")
    }

    pub async fn next_message(&mut self) -> SessionMessage {
        let text = tokio::time::timeout(WAIT, self.frames.recv())
            .await
            .expect("timed out waiting for a session message")
            .expect("session sink dropped");
        serde_json::from_str(&text).expect("session message is not JSON")
    }

    /// Skip messages until one of type `message_type` arrives.
    pub async fn expect(&mut self, message_type: &str) -> SessionMessage {
        loop {
            let message = self.next_message().await;
            if message.message_type == message_type {
                return message;
            }
        }
    }

    /// True if nothing arrives within `wait`.
    pub async fn quiet_for(&mut self, wait: Duration) -> bool {
        tokio::time::timeout(wait, self.frames.recv()).await.is_err()
    }

    pub fn send(&self, frame: serde_json::Value) {
        self.inbound
            .unbounded_send(frame.to_string())
            .expect("session loop ended");
    }

    /// Close the client side and wait for the session's cleanup.
    pub async fn disconnect(self) {
        self.inbound.close_channel();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("session did not shut down")
            .expect("session task panicked");
    }
}

pub struct Harness {
    pub broker: Arc<FlakyBroker>,
    pub store: Arc<InMemoryTripStore>,
    pub trips: Arc<dyn TripClient>,
    pub drivers: Arc<LinearDriverRegistry>,
    pub gateway: GatewayState,
    pub shutdown: CancellationToken,
    relay: Option<RelayHandle>,
}

impl Harness {
    pub async fn start() -> Self {
        let broker = Arc::new(FlakyBroker::new());
        let store = Arc::new(InMemoryTripStore::new());
        let drivers = Arc::new(LinearDriverRegistry::new());
        let shutdown = CancellationToken::new();

        let relay = OutboxRelay::new(
            store.clone(),
            broker.clone(),
            OutboxConfig {
                poll_interval_ms: 20,
                batch_size: 100,
                max_backoff_ms: 50,
            },
        );
        let trip_service = Arc::new(
            TripService::new(
                store.clone(),
                Arc::new(StraightLineRouteProvider::default()),
                PricingConfig::default(),
            )
            .with_outbox_signal(relay.waker()),
        );
        let relay = relay.spawn(shutdown.clone());
        let driver_service = Arc::new(DriverService::new(drivers.clone()));
        let trips: Arc<dyn TripClient> = Arc::new(LocalTripClient::new(trip_service));

        let matcher = TripMatcher::new(drivers.clone(), broker.clone()).with_trip_client(trips.clone());
        broker
            .consume(Queue::FindAvailableDrivers, Arc::new(matcher), shutdown.clone())
            .await
            .unwrap();
        broker
            .consume(
                Queue::DriverTripResponse,
                Arc::new(TripResponseHandler::new(trips.clone(), broker.clone())),
                shutdown.clone(),
            )
            .await
            .unwrap();

        let gateway = GatewayState {
            registry: Arc::new(SessionRegistry::new(DuplicateSessionPolicy::Replace)),
            broker: broker.clone(),
            trips: trips.clone(),
            drivers: Arc::new(LocalDriverClient::new(driver_service)),
            shutdown: shutdown.clone(),
        };
        start_relays(&gateway).await.unwrap();

        Self {
            broker,
            store,
            trips,
            drivers,
            gateway,
            shutdown,
            relay: Some(relay),
        }
    }

    fn session_channels() -> (
        TestSink,
        mpsc::UnboundedReceiver<String>,
        inbound::UnboundedSender<String>,
        inbound::UnboundedReceiver<String>,
    ) {
        let (tx, frames) = mpsc::unbounded_channel();
        let (up_tx, up_rx) = inbound::unbounded();
        (TestSink { tx }, frames, up_tx, up_rx)
    }

    /// Connect a driver and wait for its registration message.
    pub async fn connect_driver(&self, id: &str, tier: &str) -> TestSession {
        let (sink, frames, up_tx, up_rx) = Self::session_channels();
        let params = DriverParams {
            user_id: id.to_string(),
            package_slug: tier.to_string(),
        };
        let task = tokio::spawn(run_driver_session(
            self.gateway.clone(),
            params,
            Box::new(sink),
            up_rx,
        ));
        let mut session = TestSession {
            frames,
            inbound: up_tx,
            task,
            registered: None,
        };
        let registration = session.expect(RoutingKey::DriverRegister.as_str()).await;
        session.registered =
            Some(serde_json::from_value(registration.data).expect("registration is not a driver"));
        session
    }

    /// Connect a rider and wait until the registry holds the session.
    pub async fn connect_rider(&self, id: &str) -> TestSession {
        let (sink, frames, up_tx, up_rx) = Self::session_channels();
        let params = RiderParams {
            user_id: id.to_string(),
        };
        let task = tokio::spawn(run_rider_session(
            self.gateway.clone(),
            params,
            Box::new(sink),
            up_rx,
        ));
        let registry = self.gateway.registry.clone();
        let key = id.to_string();
        assert!(
            eventually(|| {
                let registry = registry.clone();
                let key = key.clone();
                async move { registry.contains(&key).await }
            })
            .await,
            "rider session never registered"
        );
        TestSession {
            frames,
            inbound: up_tx,
            task,
            registered: None,
        }
    }

    /// Preview a route for `rider_id` and book its first fare.
    pub async fn request_trip(&self, rider_id: &str, tier: &str) -> String {
        let preview = self
            .trips
            .preview_trip(
                rider_id,
                Coordinate::new(37.7749, -122.4194),
                Coordinate::new(37.8024, -122.4058),
            )
            .await
            .unwrap();
        let fare = preview
            .fares
            .iter()
            .find(|f| f.package_slug == tier)
            .expect("no fare for tier");
        self.trips.create_trip(&fare.id, rider_id).await.unwrap()
    }

    pub async fn trip(&self, trip_id: &str) -> Trip {
        self.trips.get_trip(trip_id).await.unwrap().expect("trip missing")
    }

    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(relay) = self.relay.take() {
            relay.shutdown().await;
        }
    }
}

/// Poll `check` until it returns true or `WAIT` passes.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
