//! Routes between two points.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::Coordinate;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Route {
    pub geometry: Vec<Coordinate>,
    /// Meters.
    pub distance: f64,
    /// Seconds.
    pub duration: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid coordinate: {0:?}")]
    InvalidCoordinate(Coordinate),
    #[error("route provider unavailable: {0}")]
    Unavailable(String),
}

/// Computes the route a trip would take.
#[async_trait]
pub trait RouteProvider: Send + Sync {
    async fn route(&self, pickup: Coordinate, destination: Coordinate) -> Result<Route, RouteError>;
}

/// Great-circle route at a constant average speed.
#[derive(Debug, Clone)]
pub struct StraightLineRouteProvider {
    speed_mps: f64,
}

impl Default for StraightLineRouteProvider {
    fn default() -> Self {
        // ~30 km/h urban average
        Self { speed_mps: 8.33 }
    }
}

impl StraightLineRouteProvider {
    pub fn new(speed_mps: f64) -> Self {
        Self { speed_mps }
    }
}

fn validate(point: Coordinate) -> Result<Coordinate, RouteError> {
    let valid = point.latitude.is_finite()
        && point.longitude.is_finite()
        && (-90.0..=90.0).contains(&point.latitude)
        && (-180.0..=180.0).contains(&point.longitude);
    if valid {
        Ok(point)
    } else {
        Err(RouteError::InvalidCoordinate(point))
    }
}

/// Haversine distance in meters.
pub fn haversine_meters(a: Coordinate, b: Coordinate) -> f64 {
    let (lat1, lat2) = (a.latitude.to_radians(), b.latitude.to_radians());
    let dlat = lat2 - lat1;
    let dlon = (b.longitude - a.longitude).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_METERS * h.sqrt().asin()
}

#[async_trait]
impl RouteProvider for StraightLineRouteProvider {
    async fn route(&self, pickup: Coordinate, destination: Coordinate) -> Result<Route, RouteError> {
        let pickup = validate(pickup)?;
        let destination = validate(destination)?;
        let distance = haversine_meters(pickup, destination);

        Ok(Route {
            geometry: vec![pickup, destination],
            distance,
            duration: distance / self.speed_mps,
        })
    }
}
