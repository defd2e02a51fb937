//! SQLite implementation of the trip store and outbox.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Expr, Order, Query, SqliteQueryBuilder};
use sqlx::sqlite::SqliteRow;
use sqlx::{Acquire, Row, SqlitePool};
use tracing::{debug, warn};

use super::schema::{
    Outbox, RideFares, Trips, CREATE_OUTBOX_TABLE, CREATE_RIDE_FARES_TABLE, CREATE_TRIPS_TABLE,
};
use super::{Result, StorageError, TripStore};
use crate::bus::outbox::{OutboxEntry, OutboxStore};
use crate::bus::Envelope;
use crate::domain::{RideFare, TransitionOutcome, Trip, TripStatus, TripTransition};

/// Optimistic retries before a transition gives up with `Conflict`.
const MAX_TRANSITION_ATTEMPTS: usize = 5;

/// SQLite implementation of `TripStore` and `OutboxStore`.
pub struct SqliteTripStore {
    pool: SqlitePool,
}

impl SqliteTripStore {
    /// Create a new SQLite trip store.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the database schema.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(CREATE_RIDE_FARES_TABLE)
            .execute(&self.pool)
            .await?;
        sqlx::query(CREATE_TRIPS_TABLE).execute(&self.pool).await?;
        sqlx::query(CREATE_OUTBOX_TABLE).execute(&self.pool).await?;
        Ok(())
    }
}

fn fare_from_row(row: &SqliteRow) -> Result<RideFare> {
    let route: String = row.try_get("route")?;
    Ok(RideFare {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        package_slug: row.try_get("package_slug")?,
        total_price_cents: row.try_get("total_price_cents")?,
        route: serde_json::from_str(&route)?,
    })
}

fn trip_from_row(row: &SqliteRow) -> Result<Trip> {
    let status: String = row.try_get("status")?;
    let fare: String = row.try_get("fare")?;
    let route: String = row.try_get("route")?;
    let driver: Option<String> = row.try_get("driver")?;

    Ok(Trip {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        status: status
            .parse::<TripStatus>()
            .map_err(|e| StorageError::Corrupt(e.to_string()))?,
        selected_fare: serde_json::from_str(&fare)?,
        route: serde_json::from_str(&route)?,
        driver: driver.map(|d| serde_json::from_str(&d)).transpose()?,
    })
}

fn outbox_from_row(row: &SqliteRow) -> Result<OutboxEntry> {
    let routing_key: String = row.try_get("routing_key")?;
    let envelope: Vec<u8> = row.try_get("envelope")?;
    let attempts: i64 = row.try_get("attempts")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(OutboxEntry {
        id: row.try_get("id")?,
        routing_key: routing_key
            .parse()
            .map_err(|e: crate::bus::topology::UnknownRoutingKey| StorageError::Corrupt(e.to_string()))?,
        envelope: Envelope::from_bytes(&envelope)?,
        attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| StorageError::Corrupt(format!("created_at: {}", e)))?
            .with_timezone(&Utc),
    })
}

fn driver_json(trip: &Trip) -> Result<Option<String>> {
    Ok(trip.driver.as_ref().map(serde_json::to_string).transpose()?)
}

#[async_trait]
impl TripStore for SqliteTripStore {
    async fn save_fares(&self, fares: &[RideFare]) -> Result<()> {
        if fares.is_empty() {
            return Ok(());
        }

        let mut query = Query::insert();
        query.into_table(RideFares::Table).columns([
            RideFares::Id,
            RideFares::UserId,
            RideFares::PackageSlug,
            RideFares::TotalPriceCents,
            RideFares::Route,
        ]);
        for fare in fares {
            query.values_panic([
                fare.id.clone().into(),
                fare.user_id.clone().into(),
                fare.package_slug.clone().into(),
                fare.total_price_cents.into(),
                serde_json::to_string(&fare.route)?.into(),
            ]);
        }

        sqlx::query(&query.to_string(SqliteQueryBuilder))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_fare(&self, fare_id: &str) -> Result<Option<RideFare>> {
        let query = Query::select()
            .columns([
                RideFares::Id,
                RideFares::UserId,
                RideFares::PackageSlug,
                RideFares::TotalPriceCents,
                RideFares::Route,
            ])
            .from(RideFares::Table)
            .and_where(Expr::col(RideFares::Id).eq(fare_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(fare_from_row).transpose()
    }

    async fn create_trip(&self, trip: &Trip, outbox: &[OutboxEntry]) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let mut tx = conn.begin().await?;

        let insert_trip = Query::insert()
            .into_table(Trips::Table)
            .columns([
                Trips::Id,
                Trips::UserId,
                Trips::Status,
                Trips::Fare,
                Trips::Route,
                Trips::Driver,
                Trips::UpdatedAt,
            ])
            .values_panic([
                trip.id.clone().into(),
                trip.user_id.clone().into(),
                trip.status.as_str().into(),
                serde_json::to_string(&trip.selected_fare)?.into(),
                serde_json::to_string(&trip.route)?.into(),
                driver_json(trip)?.into(),
                Utc::now().to_rfc3339().into(),
            ])
            .to_string(SqliteQueryBuilder);
        sqlx::query(&insert_trip).execute(&mut *tx).await?;

        for entry in outbox {
            let insert_entry = Query::insert()
                .into_table(Outbox::Table)
                .columns([
                    Outbox::Id,
                    Outbox::RoutingKey,
                    Outbox::Envelope,
                    Outbox::Attempts,
                    Outbox::CreatedAt,
                ])
                .values_panic([
                    entry.id.clone().into(),
                    entry.routing_key.as_str().into(),
                    entry
                        .envelope
                        .to_bytes()
                        .map_err(|e| StorageError::Corrupt(e.to_string()))?
                        .into(),
                    i64::from(entry.attempts).into(),
                    entry.created_at.to_rfc3339().into(),
                ])
                .to_string(SqliteQueryBuilder);
            sqlx::query(&insert_entry).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        debug!(trip_id = %trip.id, outbox = outbox.len(), "Trip created");
        Ok(())
    }

    async fn get_trip(&self, trip_id: &str) -> Result<Option<Trip>> {
        let query = Query::select()
            .columns([
                Trips::Id,
                Trips::UserId,
                Trips::Status,
                Trips::Fare,
                Trips::Route,
                Trips::Driver,
            ])
            .from(Trips::Table)
            .and_where(Expr::col(Trips::Id).eq(trip_id))
            .to_string(SqliteQueryBuilder);

        let row = sqlx::query(&query).fetch_optional(&self.pool).await?;
        row.as_ref().map(trip_from_row).transpose()
    }

    async fn apply_transition(
        &self,
        trip_id: &str,
        transition: TripTransition,
    ) -> Result<(Trip, TransitionOutcome)> {
        for attempt in 1..=MAX_TRANSITION_ATTEMPTS {
            let mut trip = self
                .get_trip(trip_id)
                .await?
                .ok_or_else(|| StorageError::trip_not_found(trip_id))?;
            let previous = trip.status;

            let outcome = trip.apply(transition.clone())?;
            if outcome == TransitionOutcome::AlreadyApplied {
                return Ok((trip, outcome));
            }

            // Compare-and-set on the status we read.
            let update = Query::update()
                .table(Trips::Table)
                .value(Trips::Status, trip.status.as_str())
                .value(Trips::Driver, driver_json(&trip)?)
                .value(Trips::UpdatedAt, Utc::now().to_rfc3339())
                .and_where(Expr::col(Trips::Id).eq(trip_id))
                .and_where(Expr::col(Trips::Status).eq(previous.as_str()))
                .to_string(SqliteQueryBuilder);

            let result = sqlx::query(&update).execute(&self.pool).await?;
            if result.rows_affected() == 1 {
                return Ok((trip, outcome));
            }

            warn!(trip_id = %trip_id, attempt, "Trip changed underneath transition, retrying");
        }

        Err(StorageError::Conflict(trip_id.to_string()))
    }
}

#[async_trait]
impl OutboxStore for SqliteTripStore {
    async fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let query = Query::select()
            .columns([
                Outbox::Id,
                Outbox::RoutingKey,
                Outbox::Envelope,
                Outbox::Attempts,
                Outbox::CreatedAt,
            ])
            .from(Outbox::Table)
            .order_by(Outbox::Seq, Order::Asc)
            .limit(limit as u64)
            .to_string(SqliteQueryBuilder);

        let rows = sqlx::query(&query).fetch_all(&self.pool).await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn mark_dispatched(&self, id: &str) -> Result<()> {
        let delete = Query::delete()
            .from_table(Outbox::Table)
            .and_where(Expr::col(Outbox::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&delete).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_dispatch_failure(&self, id: &str) -> Result<()> {
        let update = Query::update()
            .table(Outbox::Table)
            .value(Outbox::Attempts, Expr::col(Outbox::Attempts).add(1))
            .and_where(Expr::col(Outbox::Id).eq(id))
            .to_string(SqliteQueryBuilder);

        sqlx::query(&update).execute(&self.pool).await?;
        Ok(())
    }
}
