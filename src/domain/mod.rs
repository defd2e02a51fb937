//! Domain model shared by every service.
//!
//! Everything here is plain data plus pure rules. It crosses the broker as
//! JSON inside envelope payloads and the session wire as message data, so
//! the serde field names are part of the wire contract.

use serde::{Deserialize, Serialize};

pub mod driver;
pub mod fare;
pub mod route;
pub mod trip;

pub use driver::Driver;
pub use fare::{estimate_fares, PackagePricing, PricingConfig, RideFare};
pub use route::{Route, RouteError, RouteProvider, StraightLineRouteProvider};
pub use trip::{
    DriverTripResponse, TransitionError, TransitionOutcome, Trip, TripEvent, TripStatus,
    TripTransition,
};

/// WGS84 point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}
