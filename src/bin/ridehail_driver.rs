//! ridehail-driver: driver service
//!
//! Serves the driver gRPC API and matches new or declined trips against
//! the live driver registry.
//!
//! ## Architecture
//! ```text
//! [Gateway] --gRPC--> [ridehail-driver] (register / unregister)
//!
//! [find_available_drivers] --> TripMatcher --> driver.cmd.trip_request
//!                                          \-> trip.event.no_drivers_found
//! ```
//!
//! When no driver serves a trip's tier the matcher marks the trip
//! `no_driver` through the trip service at `clients.trip_address`.

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;
use tracing::{error, info, warn};

use ridehail::bus::{init_broker, Queue, TrackedHandler};
use ridehail::choreography::TripMatcher;
use ridehail::clients::GrpcTripClient;
use ridehail::config::Config;
use ridehail::grpc::{grpc_trace_layer, DriverGrpcServer};
use ridehail::proto::driver_service_server::DriverServiceServer;
use ridehail::services::{DriverService, LinearDriverRegistry};
use ridehail::utils::bootstrap::{
    cancel_on_signal, connect_with_retry, init_tracing, parse_config_path,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = parse_config_path();
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!("Starting ridehail-driver");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let broker = connect_with_retry("broker", &config.messaging.amqp.url, || {
        init_broker(&config.messaging)
    })
    .await?;

    let service = Arc::new(DriverService::new(Arc::new(LinearDriverRegistry::new())));

    let trips = GrpcTripClient::connect(&config.clients.trip_address).await?;
    let matcher =
        TripMatcher::new(service.registry(), broker.clone()).with_trip_client(Arc::new(trips));
    let in_flight = TaskTracker::new();
    broker
        .consume(
            Queue::FindAvailableDrivers,
            Arc::new(TrackedHandler::new(Arc::new(matcher), in_flight.clone())),
            shutdown.clone(),
        )
        .await?;

    let addr = config.server.driver_grpc_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Driver gRPC listening");

    let token = shutdown.clone();
    Server::builder()
        .layer(grpc_trace_layer())
        .add_service(DriverServiceServer::new(DriverGrpcServer::new(service)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            token.cancelled().await
        })
        .await?;

    shutdown.cancel();
    in_flight.close();
    if tokio::time::timeout(config.server.shutdown_grace(), in_flight.wait())
        .await
        .is_err()
    {
        warn!(in_flight = in_flight.len(), "Matcher still busy after grace period");
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    info!("ridehail-driver stopped");
    Ok(())
}
