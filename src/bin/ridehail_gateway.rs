//! ridehail-gateway: session gateway
//!
//! Accepts rider and driver WebSocket sessions, relays broker traffic to
//! them and fronts the trip service for preview and start requests.
//!
//! ## Configuration
//! - `clients.trip_address` / `clients.driver_address`: collaborator gRPC endpoints
//! - `server.http_port`: HTTP and WebSocket listener
//! - `sessions.duplicate_policy`: `replace` or `reject`

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use ridehail::bus::init_broker;
use ridehail::clients::{GrpcDriverClient, GrpcTripClient};
use ridehail::config::Config;
use ridehail::gateway::{self, GatewayState};
use ridehail::session::SessionRegistry;
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

    info!("Starting ridehail-gateway");

    let shutdown = CancellationToken::new();
    cancel_on_signal(shutdown.clone());

    let broker = connect_with_retry("broker", &config.messaging.amqp.url, || {
        init_broker(&config.messaging)
    })
    .await?;
    let trips = GrpcTripClient::connect(&config.clients.trip_address).await?;
    let drivers = GrpcDriverClient::connect(&config.clients.driver_address).await?;

    let registry = Arc::new(SessionRegistry::new(config.sessions.duplicate_policy));
    let state = GatewayState {
        registry: registry.clone(),
        broker: broker.clone(),
        trips: Arc::new(trips),
        drivers: Arc::new(drivers),
        shutdown: shutdown.clone(),
    };

    let listener = TcpListener::bind(config.server.http_addr()).await?;
    gateway::start_relays(&state).await?;
    gateway::serve(listener, state).await?;

    // Sessions observe the cancelled token and deregister themselves.
    let drained = tokio::time::timeout(config.server.shutdown_grace(), async {
        while !registry.is_empty().await {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await;
    if drained.is_err() {
        warn!(sessions = registry.len().await, "Sessions still open after grace period");
    }
    if let Err(e) = broker.close().await {
        warn!(error = %e, "Broker close failed");
    }

    info!("ridehail-gateway stopped");
    Ok(())
}
