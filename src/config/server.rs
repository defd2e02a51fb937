//! Listener and collaborator address configuration.

use std::time::Duration;

use serde::Deserialize;

/// Where each service listens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host for every listener.
    pub host: String,
    /// Gateway HTTP/WebSocket port. Default: 8081.
    pub http_port: u16,
    /// Trip service gRPC port. Default: 9093.
    pub trip_grpc_port: u16,
    /// Driver service gRPC port. Default: 9092.
    pub driver_grpc_port: u16,
    /// Seconds to wait for in-flight work on shutdown. Default: 10.
    pub shutdown_grace_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            http_port: 8081,
            trip_grpc_port: 9093,
            driver_grpc_port: 9092,
            shutdown_grace_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    pub fn trip_grpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.trip_grpc_port)
    }

    pub fn driver_grpc_addr(&self) -> String {
        format!("{}:{}", self.host, self.driver_grpc_port)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Remote collaborator addresses, "host:port".
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientsConfig {
    pub trip_address: String,
    pub driver_address: String,
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            trip_address: "localhost:9093".to_string(),
            driver_address: "localhost:9092".to_string(),
        }
    }
}
