//! `PostgreSQL` adapter for the dispatch store.
//!
//! # Tables
//!
//! - `users`, `shops`, `captains` - marketplace parties and their balances
//! - `platform_account` - single-row platform commission balance
//! - `orders` - shop orders with JSONB cart lines
//! - `rides` - delivery trips, at most one per order
//! - `ride_offers` - every captain a ride was offered to
//! - `ledger_entries` - immutable balance movements, unique per `(ride_id, kind)`
//! - `notifications` - delivery outcome log
//!
//! Each module holds plain query functions over a `&mut PgConnection` so they
//! compose inside one transaction; [`PgStore`] wires them into the
//! [`DispatchStore`](crate::store::DispatchStore) operations.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/dispatch/migrations/` and run via:
//! ```bash
//! cargo run -p tiffin-cli -- migrate
//! ```

mod ledger;
mod notifications;
mod orders;
mod parties;
mod rides;
mod store;

use std::time::Duration;

use moka::future::Cache;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use tiffin_core::{GeoError, GeoPoint, ShopId};

use crate::models::Shop;
use crate::store::StoreError;

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// [`DispatchStore`](crate::store::DispatchStore) backed by `PostgreSQL`.
///
/// Shops are cached for one minute; the cache entry is dropped whenever the
/// shop's balance changes.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    shops: Cache<ShopId, Shop>,
}

impl PgStore {
    /// Wrap a connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let shops = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(Duration::from_secs(60))
            .build();
        Self { pool, shops }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

impl std::fmt::Debug for PgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgStore")
            .field("pool_size", &self.pool.size())
            .field("cached_shops", &self.shops.entry_count())
            .finish()
    }
}

/// Rebuild a coordinate read from two columns.
fn point(column: &str, lat: f64, lng: f64) -> Result<GeoPoint, StoreError> {
    GeoPoint::new(lat, lng)
        .map_err(|e: GeoError| StoreError::DataCorruption(format!("invalid {column} in database: {e}")))
}

/// Map a unique-constraint violation to [`StoreError::Conflict`].
fn conflict_on_unique(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(db.message().to_owned())
        }
        _ => StoreError::Database(e),
    }
}
