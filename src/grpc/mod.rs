//! gRPC surfaces for the trip and driver services.
//!
//! Service errors map onto distinct status codes so remote callers can tell a
//! verdict on the request (not found, invalid transition) from a transient
//! outage. Messages for internal failures stay generic; details are logged.

mod convert;
mod driver;
mod trip;

use tonic::transport::Channel;
use tonic::Status;
use tower_http::classify::{GrpcErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::domain::RouteError;
use crate::services::{DriverError, TripError};
use crate::storage::StorageError;

pub use convert::{fare_from_proto, transition_from_proto, transition_to_proto};
pub use driver::DriverGrpcServer;
pub use trip::TripGrpcServer;

/// Connect to a gRPC endpoint.
///
/// The address should be in the format "host:port".
pub async fn connect_channel(address: &str) -> Result<Channel, String> {
    Channel::from_shared(format!("http://{}", address))
        .map_err(|e| format!("Invalid URI: {}", e))?
        .connect()
        .await
        .map_err(|e| format!("Connection failed: {}", e))
}

/// Trace layer for the gRPC servers: one `grpc` span per call, keyed by path.
pub fn grpc_trace_layer() -> TraceLayer<
    SharedClassifier<GrpcErrorsAsFailures>,
    impl Fn(&http::Request<tonic::body::BoxBody>) -> tracing::Span + Clone,
> {
    TraceLayer::new_for_grpc().make_span_with(|request: &http::Request<tonic::body::BoxBody>| {
        tracing::info_span!("grpc", path = %request.uri().path())
    })
}

impl From<TripError> for Status {
    fn from(e: TripError) -> Self {
        match e {
            TripError::Invalid(msg) => Status::invalid_argument(msg),
            TripError::FareNotFound(id) => Status::not_found(format!("fare not found: {id}")),
            TripError::NotFound(id) => Status::not_found(format!("trip not found: {id}")),
            e @ TripError::FareOwnership { .. } => Status::permission_denied(e.to_string()),
            TripError::Transition(e) => Status::failed_precondition(e.to_string()),
            TripError::Route(RouteError::InvalidCoordinate(c)) => {
                Status::invalid_argument(format!("invalid coordinate: {c:?}"))
            }
            TripError::Route(e @ RouteError::Unavailable(_)) => {
                error!(error = %e, "Route provider failed");
                Status::unavailable("route provider unavailable")
            }
            TripError::Storage(StorageError::Unavailable(msg)) => {
                error!(error = %msg, "Trip store unavailable");
                Status::unavailable("trip store unavailable")
            }
            TripError::Storage(StorageError::Conflict(id)) => {
                Status::aborted(format!("concurrent update of trip {id}"))
            }
            other => {
                error!(error = %other, "Trip service failed");
                Status::internal("internal error")
            }
        }
    }
}

impl From<DriverError> for Status {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::NotFound(id) => Status::not_found(format!("driver not found: {id}")),
            DriverError::Invalid(msg) => Status::invalid_argument(msg),
        }
    }
}
