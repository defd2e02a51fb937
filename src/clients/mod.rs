//! Clients for the trip and driver collaborators.
//!
//! The gateway and the choreography consumers talk to these traits. `Local*`
//! implementations call the services in-process (standalone mode and tests),
//! `Grpc*` implementations go over the wire.

mod grpc;
mod local;

use async_trait::async_trait;
use tonic::{Code, Status};

use crate::domain::{Coordinate, Driver, TransitionOutcome, Trip, TripTransition};
use crate::domain::RouteError;
use crate::services::{DriverError, TripError, TripPreview};
use crate::storage::StorageError;

pub use grpc::{GrpcDriverClient, GrpcTripClient};
pub use local::{LocalDriverClient, LocalTripClient};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    /// The collaborator understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Whether retrying the same call later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Unavailable(_) | ClientError::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<Status> for ClientError {
    fn from(status: Status) -> Self {
        let msg = status.message().to_string();
        match status.code() {
            Code::NotFound => ClientError::NotFound(msg),
            Code::InvalidArgument => ClientError::Invalid(msg),
            Code::PermissionDenied | Code::FailedPrecondition | Code::AlreadyExists => {
                ClientError::Rejected(msg)
            }
            Code::Unavailable | Code::Aborted | Code::DeadlineExceeded | Code::Cancelled => {
                ClientError::Unavailable(msg)
            }
            _ => ClientError::Internal(msg),
        }
    }
}

impl From<TripError> for ClientError {
    fn from(e: TripError) -> Self {
        match e {
            TripError::Invalid(msg) => ClientError::Invalid(msg),
            TripError::FareNotFound(id) | TripError::NotFound(id) => ClientError::NotFound(id),
            e @ TripError::FareOwnership { .. } => ClientError::Rejected(e.to_string()),
            TripError::Transition(e) => ClientError::Rejected(e.to_string()),
            TripError::Route(e @ RouteError::InvalidCoordinate(_)) => {
                ClientError::Invalid(e.to_string())
            }
            TripError::Route(e @ RouteError::Unavailable(_)) => {
                ClientError::Unavailable(e.to_string())
            }
            TripError::Storage(e @ (StorageError::Unavailable(_) | StorageError::Conflict(_))) => {
                ClientError::Unavailable(e.to_string())
            }
            other => ClientError::Internal(other.to_string()),
        }
    }
}

impl From<DriverError> for ClientError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound(id) => ClientError::NotFound(id),
            DriverError::Invalid(msg) => ClientError::Invalid(msg),
        }
    }
}

/// Trip RPC surface.
#[async_trait]
pub trait TripClient: Send + Sync {
    async fn preview_trip(
        &self,
        user_id: &str,
        pickup: Coordinate,
        destination: Coordinate,
    ) -> Result<TripPreview>;

    /// Returns the new trip's id.
    async fn create_trip(&self, fare_id: &str, user_id: &str) -> Result<String>;

    /// `None` when no trip has that id.
    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>>;

    async fn update_trip(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<TransitionOutcome>;
}

/// Driver RPC surface.
#[async_trait]
pub trait DriverClient: Send + Sync {
    async fn register_driver(&self, driver_id: &str, package_slug: &str) -> Result<Driver>;

    /// Idempotent; `false` if the driver was not registered.
    async fn unregister_driver(&self, driver_id: &str) -> Result<bool>;
}
