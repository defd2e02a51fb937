//! SQLite trip store integration tests.
//!
//! Run with: cargo test --test storage_sqlite --features sqlite
//!
//! Uses an in-memory database by default, no external dependencies required.

use ridehail::bus::outbox::{OutboxEntry, OutboxStore};
use ridehail::bus::{Envelope, RoutingKey};
use ridehail::domain::{
    estimate_fares, Coordinate, Driver, PricingConfig, Route, TransitionError,
    TransitionOutcome, Trip, TripEvent, TripStatus, TripTransition,
};
use ridehail::storage::{SqliteTripStore, StorageError, TripStore};
use sqlx::sqlite::SqlitePoolOptions;

/// One connection, so every query sees the same in-memory database.
async fn memory_store() -> SqliteTripStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("Failed to connect to SQLite");
    let store = SqliteTripStore::new(pool);
    store.init().await.expect("Failed to create schema");
    store
}

fn route() -> Route {
    Route {
        geometry: vec![
            Coordinate::new(37.7749, -122.4194),
            Coordinate::new(37.8024, -122.4058),
        ],
        distance: 3200.0,
        duration: 480.0,
    }
}

fn driver(id: &str) -> Driver {
    Driver {
        id: id.to_string(),
        name: "Test Driver".to_string(),
        package_slug: "sedan".to_string(),
        location: Coordinate::new(37.78, -122.41),
        car_plate: "XYZ".to_string(),
        profile_picture: String::new(),
    }
}

async fn requested_trip(store: &SqliteTripStore, user_id: &str) -> Trip {
    let fares = estimate_fares(user_id, &route(), &PricingConfig::default());
    store.save_fares(&fares).await.unwrap();
    let trip = Trip::from_fare(fares[0].clone());
    let envelope = Envelope::json(user_id, &TripEvent { trip: trip.clone() }).unwrap();
    store
        .create_trip(&trip, &[OutboxEntry::new(RoutingKey::TripCreated, envelope)])
        .await
        .unwrap();
    trip
}

#[tokio::test]
async fn test_fares_round_trip() {
    let store = memory_store().await;
    let fares = estimate_fares("rider-1", &route(), &PricingConfig::default());

    store.save_fares(&fares).await.unwrap();

    for fare in &fares {
        let loaded = store.get_fare(&fare.id).await.unwrap();
        assert_eq!(loaded.as_ref(), Some(fare));
    }
    assert!(store.get_fare("missing").await.unwrap().is_none());
}

#[tokio::test]
async fn test_create_trip_writes_outbox_entry() {
    let store = memory_store().await;
    let trip = requested_trip(&store, "rider-1").await;

    let loaded = store.get_trip(&trip.id).await.unwrap().unwrap();
    assert_eq!(loaded, trip);

    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].routing_key, RoutingKey::TripCreated);
    assert_eq!(pending[0].attempts, 0);
    let event: TripEvent = pending[0].envelope.decode_json().unwrap();
    assert_eq!(event.trip.id, trip.id);
}

#[tokio::test]
async fn test_failed_trip_insert_leaves_no_outbox_entry() {
    let store = memory_store().await;
    let trip = requested_trip(&store, "rider-1").await;
    store
        .mark_dispatched(&store.pending_outbox(1).await.unwrap()[0].id)
        .await
        .unwrap();

    // Same trip id violates the primary key; the outbox insert must roll back.
    let envelope = Envelope::json("rider-1", &TripEvent { trip: trip.clone() }).unwrap();
    let result = store
        .create_trip(&trip, &[OutboxEntry::new(RoutingKey::TripCreated, envelope)])
        .await;

    assert!(matches!(result, Err(StorageError::Database(_))));
    assert!(store.pending_outbox(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_outbox_order_and_bookkeeping() {
    let store = memory_store().await;
    let first = requested_trip(&store, "rider-1").await;
    let second = requested_trip(&store, "rider-2").await;

    let pending = store.pending_outbox(10).await.unwrap();
    let owners: Vec<_> = pending.iter().map(|e| e.envelope.owner_id.as_str()).collect();
    assert_eq!(owners, vec!["rider-1", "rider-2"]);

    store.record_dispatch_failure(&pending[0].id).await.unwrap();
    store.record_dispatch_failure(&pending[0].id).await.unwrap();
    let pending = store.pending_outbox(1).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].attempts, 2);
    assert_eq!(
        pending[0].envelope.decode_json::<TripEvent>().unwrap().trip.id,
        first.id
    );

    store.mark_dispatched(&pending[0].id).await.unwrap();
    let pending = store.pending_outbox(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].envelope.decode_json::<TripEvent>().unwrap().trip.id,
        second.id
    );
}

#[tokio::test]
async fn test_assign_then_redeliver() {
    let store = memory_store().await;
    let trip = requested_trip(&store, "rider-1").await;

    let (assigned, outcome) = store
        .apply_transition(&trip.id, TripTransition::Assign(driver("d1")))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::Applied);
    assert_eq!(assigned.status, TripStatus::Assigned);
    assert_eq!(assigned.driver.as_ref().map(|d| d.id.as_str()), Some("d1"));

    let (again, outcome) = store
        .apply_transition(&trip.id, TripTransition::Assign(driver("d1")))
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::AlreadyApplied);
    assert_eq!(again, assigned);

    let loaded = store.get_trip(&trip.id).await.unwrap().unwrap();
    assert_eq!(loaded, assigned);
}

#[tokio::test]
async fn test_rejected_transitions() {
    let store = memory_store().await;
    let trip = requested_trip(&store, "rider-1").await;
    store
        .apply_transition(&trip.id, TripTransition::Assign(driver("d1")))
        .await
        .unwrap();

    let err = store
        .apply_transition(&trip.id, TripTransition::Rematch)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transition(TransitionError::InvalidTransition { .. })
    ));

    let err = store
        .apply_transition(&trip.id, TripTransition::Assign(driver("d2")))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        StorageError::Transition(TransitionError::AssignedToOther { .. })
    ));

    let err = store
        .apply_transition("missing", TripTransition::NoDriver)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn test_rematch_then_no_driver() {
    let store = memory_store().await;
    let trip = requested_trip(&store, "rider-1").await;

    store
        .apply_transition(&trip.id, TripTransition::Rematch)
        .await
        .unwrap();
    let (_, outcome) = store
        .apply_transition(&trip.id, TripTransition::Rematch)
        .await
        .unwrap();
    assert_eq!(outcome, TransitionOutcome::AlreadyApplied);

    let (trip, _) = store
        .apply_transition(&trip.id, TripTransition::NoDriver)
        .await
        .unwrap();
    assert_eq!(trip.status, TripStatus::NoDriver);
    assert!(trip.driver.is_none());
}

#[tokio::test]
async fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("trips.db").display());

    let trip = {
        let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
        let store = SqliteTripStore::new(pool.clone());
        store.init().await.unwrap();
        let trip = requested_trip(&store, "rider-1").await;
        pool.close().await;
        trip
    };

    let pool = sqlx::SqlitePool::connect(&url).await.unwrap();
    let store = SqliteTripStore::new(pool);
    store.init().await.unwrap();

    assert_eq!(store.get_trip(&trip.id).await.unwrap(), Some(trip));
    assert_eq!(store.pending_outbox(10).await.unwrap().len(), 1);
}
