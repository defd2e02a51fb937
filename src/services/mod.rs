//! Service logic behind the trip and driver RPC surfaces.

pub mod driver;
pub mod trip;

pub use driver::{DriverError, DriverRegistry, DriverService, LinearDriverRegistry};
pub use trip::{TripError, TripPreview, TripService};
