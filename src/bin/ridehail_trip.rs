//! ridehail-trip: trip service
//!
//! Serves the trip gRPC API, consumes driver decisions from
//! `driver_trip_response` and relays the trip outbox onto the broker.
//!
//! ## Architecture
//! ```text
//! [Gateway] --gRPC--> [ridehail-trip] --outbox--> trip.event.created
//!                            ^
//!                            | driver.cmd.trip_{accept,decline}
//!                      [driver_trip_response]
//! ```

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;
use tracing::{error, info, warn};

use ridehail::bus::{init_broker, OutboxRelay, Queue};
use ridehail::choreography::TripResponseHandler;
use ridehail::clients::LocalTripClient;
use ridehail::config::Config;
use ridehail::domain::StraightLineRouteProvider;
use ridehail::grpc::{grpc_trace_layer, TripGrpcServer};
use ridehail::proto::trip_service_server::TripServiceServer;
use ridehail::services::TripService;
use ridehail::storage::init_storage;
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

    info!("Starting ridehail-trip");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let stores = init_storage(&config.storage).await?;
    let broker = connect_with_retry("broker", &config.messaging.amqp.url, || {
        init_broker(&config.messaging)
    })
    .await?;

    let relay = OutboxRelay::new(stores.outbox.clone(), broker.clone(), config.outbox.clone());
    let service = Arc::new(
        TripService::new(
            stores.trips.clone(),
            Arc::new(StraightLineRouteProvider::default()),
            config.pricing.clone(),
        )
        .with_outbox_signal(relay.waker()),
    );
    let relay = relay.spawn(shutdown.clone());

    let responses = TripResponseHandler::new(
        Arc::new(LocalTripClient::new(service.clone())),
        broker.clone(),
    );
    broker
        .consume(Queue::DriverTripResponse, Arc::new(responses), shutdown.clone())
        .await?;

    let addr = config.server.trip_grpc_addr();
    let listener = TcpListener::bind(&addr).await?;
    info!(addr = %addr, "Trip gRPC listening");

    let token = shutdown.clone();
    Server::builder()
        .layer(grpc_trace_layer())
        .add_service(TripServiceServer::new(TripGrpcServer::new(service)))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
            token.cancelled().await
        })
        .await?;

    shutdown.cancel();
    if tokio::time::timeout(config.server.shutdown_grace(), relay.shutdown())
        .await
        .is_err()
    {
        warn!("Outbox relay did not stop within the grace period");
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    info!("ridehail-trip stopped");
    Ok(())
}
