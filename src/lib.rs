//! Ridehail - event-choreographed ride dispatch.
//!
//! Three cooperating services talk over a topic exchange:
//!
//! - the gateway holds live rider and driver WebSocket sessions and relays
//!   broker traffic to them
//! - the trip service prices routes, persists trips and records their
//!   lifecycle events through a transactional outbox
//! - the driver service keeps the live driver registry and matches new
//!   trips to drivers
//!
//! They can run as separate processes over RabbitMQ or together in one
//! process over in-memory channels.

pub mod bus;
pub mod choreography;
pub mod clients;
pub mod config;
pub mod domain;
pub mod gateway;
pub mod grpc;
pub mod services;
pub mod session;
pub mod storage;
pub mod utils;

pub mod proto {
    tonic::include_proto!("ridehail");
}

#[cfg(test)]
pub(crate) mod test_utils;
