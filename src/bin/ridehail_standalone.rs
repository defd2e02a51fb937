//! ridehail-standalone: every service in one process
//!
//! Gateway, trip service and driver service share an in-process channel
//! broker and call each other directly. The trip and driver gRPC APIs are
//! still served on their configured ports.
//!
//! ```text
//! [Gateway HTTP/WS] --local--> [TripService] --outbox--> [ChannelBroker]
//!          \--------local--> [DriverService]                  |
//!                                   ^                         v
//!                              TripMatcher <-- find_available_drivers
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use ridehail::bus::{ChannelBroker, MessageBroker, OutboxRelay, Queue};
use ridehail::choreography::{TripMatcher, TripResponseHandler};
use ridehail::clients::{LocalDriverClient, LocalTripClient, TripClient};
use ridehail::config::Config;
use ridehail::domain::StraightLineRouteProvider;
use ridehail::gateway::{self, GatewayState};
use ridehail::grpc::{grpc_trace_layer, DriverGrpcServer, TripGrpcServer};
use ridehail::proto::driver_service_server::DriverServiceServer;
use ridehail::proto::trip_service_server::TripServiceServer;
use ridehail::services::{DriverService, LinearDriverRegistry, TripService};
use ridehail::session::SessionRegistry;
use ridehail::storage::init_storage;
use ridehail::utils::bootstrap::{cancel_on_signal, init_tracing, parse_config_path};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting ridehail-standalone");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let broker: Arc<dyn MessageBroker> = Arc::new(ChannelBroker::new());
    let stores = init_storage(&config.storage).await?;

    let relay = OutboxRelay::new(stores.outbox.clone(), broker.clone(), config.outbox.clone());
    let trip_service = Arc::new(
        TripService::new(
            stores.trips.clone(),
            Arc::new(StraightLineRouteProvider::default()),
            config.pricing.clone(),
        )
        .with_outbox_signal(relay.waker()),
    );
    let relay = relay.spawn(shutdown.clone());
    let driver_service = Arc::new(DriverService::new(Arc::new(LinearDriverRegistry::new())));

    let trips: Arc<dyn TripClient> = Arc::new(LocalTripClient::new(trip_service.clone()));

    let matcher =
        TripMatcher::new(driver_service.registry(), broker.clone()).with_trip_client(trips.clone());
    broker
        .consume(Queue::FindAvailableDrivers, Arc::new(matcher), shutdown.clone())
        .await?;
    broker
        .consume(
            Queue::DriverTripResponse,
            Arc::new(TripResponseHandler::new(trips.clone(), broker.clone())),
            shutdown.clone(),
        )
        .await?;

    let trip_listener = TcpListener::bind(config.server.trip_grpc_addr()).await?;
    let driver_listener = TcpListener::bind(config.server.driver_grpc_addr()).await?;
    info!(
        trip = %config.server.trip_grpc_addr(),
        driver = %config.server.driver_grpc_addr(),
        "gRPC listening"
    );
    let token = shutdown.clone();
    let grpc = Server::builder()
        .layer(grpc_trace_layer())
        .add_service(TripServiceServer::new(TripGrpcServer::new(trip_service)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(trip_listener), async move {
            token.cancelled().await
        });
    let token = shutdown.clone();
    let driver_grpc = Server::builder()
        .layer(grpc_trace_layer())
        .add_service(DriverServiceServer::new(DriverGrpcServer::new(
            driver_service.clone(),
        )))
        .serve_with_incoming_shutdown(TcpListenerStream::new(driver_listener), async move {
            token.cancelled().await
        });
    let grpc_task = tokio::spawn(async move {
        let (trip, driver) = tokio::join!(grpc, driver_grpc);
        if let Err(e) = trip {
            error!(error = %e, "Trip gRPC server failed");
        }
        if let Err(e) = driver {
            error!(error = %e, "Driver gRPC server failed");
        }
    });

    let registry = Arc::new(SessionRegistry::new(config.sessions.duplicate_policy));
    let state = GatewayState {
        registry: registry.clone(),
        broker: broker.clone(),
        trips,
        drivers: Arc::new(LocalDriverClient::new(driver_service)),
        shutdown: shutdown.clone(),
    };
    let listener = TcpListener::bind(config.server.http_addr()).await?;
    gateway::start_relays(&state).await?;
    gateway::serve(listener, state).await?;

    shutdown.cancel();
    let grace = config.server.shutdown_grace();
    let drained = tokio::time::timeout(grace, async {
        while !registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        relay.shutdown().await;
        if let Err(e) = grpc_task.await {
            error!(error = %e, "gRPC task failed");
        }
    })
    .await;
    if drained.is_err() {
        warn!("Shutdown grace period elapsed with work still running");
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    info!("ridehail-standalone stopped");
    Ok(())
}
