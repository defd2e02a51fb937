//! Trip persistence.
//!
//! `TripStore` is the lookup/update contract the trip service relies on.
//! Trip creation writes the trip and its outbox entries in one transaction;
//! transitions are load-apply-save under the same guarantee.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use crate::bus::outbox::{OutboxEntry, OutboxStore};
use crate::domain::{RideFare, TransitionError, TransitionOutcome, Trip, TripTransition};

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod schema;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryTripStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTripStore;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("Concurrent update of trip {0}")]
    Conflict(String),

    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    pub fn trip_not_found(id: impl Into<String>) -> Self {
        StorageError::NotFound {
            kind: "trip",
            id: id.into(),
        }
    }
}

/// Persistence contract for fares and trips.
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn save_fares(&self, fares: &[RideFare]) -> Result<()>;

    async fn get_fare(&self, fare_id: &str) -> Result<Option<RideFare>>;

    /// Insert `trip` and `outbox` atomically.
    async fn create_trip(&self, trip: &Trip, outbox: &[OutboxEntry]) -> Result<()>;

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>>;

    /// Apply `transition` to the stored trip and return the stored result.
    ///
    /// `NotFound` if the trip is absent, `Transition` if the state machine
    /// rejects the change.
    async fn apply_transition(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<(Trip, TransitionOutcome)>;
}

/// Storage type discriminator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    #[default]
    Memory,
    Sqlite,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub storage_type: StorageType,
    /// SQLite database file.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            path: "./data/trips.db".to_string(),
        }
    }
}

/// Both views of one backing store.
#[derive(Clone)]
pub struct Stores {
    pub trips: Arc<dyn TripStore>,
    pub outbox: Arc<dyn OutboxStore>,
}

impl Stores {
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: TripStore + OutboxStore + 'static,
    {
        Self {
            trips: store.clone(),
            outbox: store,
        }
    }
}

/// Initialize storage based on configuration.
pub async fn init_storage(config: &StorageConfig) -> std::result::Result<Stores, Box<dyn std::error::Error>> {
    match config.storage_type {
        StorageType::Memory => {
            info!("Storage: memory");
            Ok(Stores::from_store(Arc::new(InMemoryTripStore::new())))
        }
        #[cfg(feature = "sqlite")]
        StorageType::Sqlite => {
            info!("Storage: sqlite at {}", config.path);
            if let Some(parent) = std::path::Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)?;
            }

            let pool =
                sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", config.path)).await?;
            let store = Arc::new(SqliteTripStore::new(pool));
            store.init().await?;
            Ok(Stores::from_store(store))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageType::Sqlite => {
            tracing::error!("SQLite storage requested but 'sqlite' feature is not enabled");
            Err("SQLite feature not enabled".into())
        }
    }
}
