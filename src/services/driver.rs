//! Driver registration and the registry matching reads from.

use std::sync::Arc;

use async_trait::async_trait;
use rand::seq::IndexedRandom;
use rand::Rng;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::domain::{Coordinate, Driver};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver not found: {0}")]
    NotFound(String),
    #[error("invalid driver registration: {0}")]
    Invalid(String),
}

/// Live set of drivers available for matching.
#[async_trait]
pub trait DriverRegistry: Send + Sync {
    /// Add `driver`, replacing any record with the same id.
    async fn register(&self, driver: Driver);

    /// Remove and return the record. `NotFound` if absent.
    async fn unregister(&self, driver_id: &str) -> Result<Driver, DriverError>;

    /// Drivers serving `tier`, in registration order.
    async fn find_by_tier(&self, tier: &str) -> Vec<Driver>;
}

/// Linear scan over a list under one lock.
#[derive(Default)]
pub struct LinearDriverRegistry {
    drivers: Mutex<Vec<Driver>>,
}

impl LinearDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.drivers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.drivers.lock().await.is_empty()
    }
}

#[async_trait]
impl DriverRegistry for LinearDriverRegistry {
    async fn register(&self, driver: Driver) {
        let mut drivers = self.drivers.lock().await;
        match drivers.iter_mut().find(|d| d.id == driver.id) {
            Some(existing) => *existing = driver,
            None => drivers.push(driver),
        }
    }

    async fn unregister(&self, driver_id: &str) -> Result<Driver, DriverError> {
        let mut drivers = self.drivers.lock().await;
        let index = drivers
            .iter()
            .position(|d| d.id == driver_id)
            .ok_or_else(|| DriverError::NotFound(driver_id.to_string()))?;
        Ok(drivers.remove(index))
    }

    async fn find_by_tier(&self, tier: &str) -> Vec<Driver> {
        self.drivers
            .lock()
            .await
            .iter()
            .filter(|d| d.serves(tier))
            .cloned()
            .collect()
    }
}

/// Where newly registered drivers are placed.
const START_POINTS: [(f64, f64); 4] = [
    (37.7749, -122.4194),
    (37.7858, -122.4064),
    (37.7694, -122.4862),
    (37.8024, -122.4058),
];

const NAMES: [&str; 5] = [
    "Alex Morgan",
    "Sam Rivera",
    "Jordan Lee",
    "Casey Brooks",
    "Riley Chen",
];

const PLATE_LEN: usize = 3;

fn random_plate(rng: &mut impl Rng) -> String {
    (0..PLATE_LEN)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

/// Builds driver records and keeps the registry current.
pub struct DriverService {
    registry: Arc<dyn DriverRegistry>,
}

impl DriverService {
    pub fn new(registry: Arc<dyn DriverRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> Arc<dyn DriverRegistry> {
        Arc::clone(&self.registry)
    }

    pub async fn register(&self, driver_id: &str, package_slug: &str) -> Result<Driver, DriverError> {
        if driver_id.is_empty() {
            return Err(DriverError::Invalid("driver id is required".to_string()));
        }
        if package_slug.is_empty() {
            return Err(DriverError::Invalid("package slug is required".to_string()));
        }

        let driver = {
            let mut rng = rand::rng();
            let start = rng.random_range(0..START_POINTS.len());
            let (latitude, longitude) = START_POINTS[start];
            Driver {
                id: driver_id.to_string(),
                name: NAMES.choose(&mut rng).copied().unwrap_or("Driver").to_string(),
                package_slug: package_slug.to_string(),
                location: Coordinate::new(latitude, longitude),
                car_plate: random_plate(&mut rng),
                profile_picture: format!("https://randomuser.me/api/portraits/lego/{}.jpg", start),
            }
        };

        self.registry.register(driver.clone()).await;
        info!(driver_id = %driver.id, package_slug = %driver.package_slug, "Driver registered");
        Ok(driver)
    }

    /// Idempotent: returns `false` if the driver was not registered.
    pub async fn unregister(&self, driver_id: &str) -> Result<bool, DriverError> {
        match self.registry.unregister(driver_id).await {
            Ok(_) => {
                info!(driver_id = %driver_id, "Driver unregistered");
                Ok(true)
            }
            Err(DriverError::NotFound(_)) => {
                warn!(driver_id = %driver_id, "Unregister for unknown driver ignored");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
