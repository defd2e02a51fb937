//! Database schema definitions using sea-query.
//!
//! These define the table and column identifiers for type-safe query building.

use sea_query::Iden;

/// Ride fares table schema.
#[derive(Iden)]
pub enum RideFares {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "package_slug"]
    PackageSlug,
    #[iden = "total_price_cents"]
    TotalPriceCents,
    #[iden = "route"]
    Route,
}

/// Trips table schema.
#[derive(Iden)]
pub enum Trips {
    Table,
    #[iden = "id"]
    Id,
    #[iden = "user_id"]
    UserId,
    #[iden = "status"]
    Status,
    #[iden = "fare"]
    Fare,
    #[iden = "route"]
    Route,
    #[iden = "driver"]
    Driver,
    #[iden = "updated_at"]
    UpdatedAt,
}

/// Outbox table schema.
#[derive(Iden)]
pub enum Outbox {
    Table,
    #[iden = "seq"]
    Seq,
    #[iden = "id"]
    Id,
    #[iden = "routing_key"]
    RoutingKey,
    #[iden = "envelope"]
    Envelope,
    #[iden = "attempts"]
    Attempts,
    #[iden = "created_at"]
    CreatedAt,
}

/// SQL for creating the ride fares table.
pub const CREATE_RIDE_FARES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS ride_fares (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    package_slug TEXT NOT NULL,
    total_price_cents INTEGER NOT NULL,
    route TEXT NOT NULL
);
"#;

/// SQL for creating the trips table.
pub const CREATE_TRIPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trips (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    status TEXT NOT NULL,
    fare TEXT NOT NULL,
    route TEXT NOT NULL,
    driver TEXT,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_trips_user ON trips(user_id);
"#;

/// SQL for creating the outbox table. `seq` fixes publish order.
pub const CREATE_OUTBOX_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS outbox (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    routing_key TEXT NOT NULL,
    envelope BLOB NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);
"#;
