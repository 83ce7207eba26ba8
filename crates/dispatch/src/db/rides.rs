//! Queries for rides and ride offers.
//!
//! Every state change is a single `UPDATE ... WHERE status = ... RETURNING`;
//! an empty result means the precondition did not hold and the caller rolls
//! back.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use tiffin_core::{CaptainId, Money, OrderId, Otp, RideId, RideStatus, ShopId, UserId};

use super::point;
use crate::models::{NewRide, Ride};
use crate::store::StoreError;

#[derive(sqlx::FromRow)]
struct RideRow {
    id: RideId,
    order_id: Option<OrderId>,
    user_id: UserId,
    shop_id: Option<ShopId>,
    captain_id: Option<CaptainId>,
    status: RideStatus,
    pickup_lat: f64,
    pickup_lng: f64,
    dropoff_lat: f64,
    dropoff_lng: f64,
    distance_km: Decimal,
    fare: Money,
    otp: String,
    otp_attempts: i32,
    dispatch_attempts: i32,
    last_dispatched_at: Option<DateTime<Utc>>,
    accepted_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RideRow> for Ride {
    type Error = StoreError;

    fn try_from(r: RideRow) -> Result<Self, Self::Error> {
        let otp = Otp::parse(&r.otp).map_err(|e| {
            StoreError::DataCorruption(format!("invalid otp for ride {}: {e}", r.id))
        })?;
        Ok(Self {
            id: r.id,
            order_id: r.order_id,
            user_id: r.user_id,
            shop_id: r.shop_id,
            captain_id: r.captain_id,
            status: r.status,
            pickup: point("ride pickup", r.pickup_lat, r.pickup_lng)?,
            dropoff: point("ride dropoff", r.dropoff_lat, r.dropoff_lng)?,
            distance_km: r.distance_km,
            fare: r.fare,
            otp,
            otp_attempts: r.otp_attempts,
            dispatch_attempts: r.dispatch_attempts,
            last_dispatched_at: r.last_dispatched_at,
            accepted_at: r.accepted_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            cancelled_at: r.cancelled_at,
            cancel_reason: r.cancel_reason,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const RIDE_COLUMNS: &str = "id, order_id, user_id, shop_id, captain_id, status, \
     pickup_lat, pickup_lng, dropoff_lat, dropoff_lng, distance_km, fare, otp, otp_attempts, \
     dispatch_attempts, last_dispatched_at, accepted_at, started_at, completed_at, \
     cancelled_at, cancel_reason, created_at, updated_at";

fn decode(row: Option<RideRow>) -> Result<Option<Ride>, StoreError> {
    row.map(Ride::try_from).transpose()
}

pub(super) async fn insert(conn: &mut PgConnection, new: &NewRide) -> Result<Ride, StoreError> {
    let row: RideRow = sqlx::query_as(&format!(
        "INSERT INTO rides (order_id, user_id, shop_id, pickup_lat, pickup_lng, \
                            dropoff_lat, dropoff_lng, distance_km, fare, otp, \
                            created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $11) \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(new.order_id)
    .bind(new.user_id)
    .bind(new.shop_id)
    .bind(new.pickup.lat())
    .bind(new.pickup.lng())
    .bind(new.dropoff.lat())
    .bind(new.dropoff.lng())
    .bind(new.distance_km)
    .bind(new.fare)
    .bind(new.otp.as_str())
    .bind(new.created_at)
    .fetch_one(conn)
    .await
    .map_err(super::conflict_on_unique)?;
    row.try_into()
}

pub(super) async fn get(conn: &mut PgConnection, id: RideId) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> =
        sqlx::query_as(&format!("SELECT {RIDE_COLUMNS} FROM rides WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    decode(row)
}

pub(super) async fn for_order(
    conn: &mut PgConnection,
    order_id: OrderId,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> =
        sqlx::query_as(&format!("SELECT {RIDE_COLUMNS} FROM rides WHERE order_id = $1"))
            .bind(order_id)
            .fetch_optional(conn)
            .await?;
    decode(row)
}

/// Explain why a compare-and-set on a ride matched no row.
pub(super) async fn diagnose(
    conn: &mut PgConnection,
    id: RideId,
    expected: RideStatus,
) -> Result<StoreError, StoreError> {
    Ok(match get(conn, id).await? {
        None => StoreError::NotFound,
        Some(ride) if ride.status != expected => StoreError::RideState {
            actual: ride.status,
        },
        Some(_) => StoreError::NotAssigned,
    })
}

/// Bump the dispatch round counter of a `requested` ride.
pub(super) async fn stamp_dispatch(
    conn: &mut PgConnection,
    id: RideId,
    now: DateTime<Utc>,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> = sqlx::query_as(&format!(
        "UPDATE rides SET dispatch_attempts = dispatch_attempts + 1, \
                          last_dispatched_at = $2, updated_at = $2 \
         WHERE id = $1 AND status = 'requested' \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(id)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    decode(row)
}

pub(super) async fn insert_offers(
    conn: &mut PgConnection,
    id: RideId,
    captains: &[CaptainId],
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    let ids: Vec<i32> = captains.iter().map(CaptainId::as_i32).collect();
    sqlx::query(
        "INSERT INTO ride_offers (ride_id, captain_id, offered_at) \
         SELECT $1, captain_id, $3 FROM UNNEST($2::INTEGER[]) AS captain_id \
         ON CONFLICT (ride_id, captain_id) DO NOTHING",
    )
    .bind(id)
    .bind(ids)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

pub(super) async fn offers(
    conn: &mut PgConnection,
    id: RideId,
) -> Result<Vec<CaptainId>, StoreError> {
    Ok(sqlx::query_scalar(
        "SELECT captain_id FROM ride_offers WHERE ride_id = $1 ORDER BY offered_at, captain_id",
    )
    .bind(id)
    .fetch_all(conn)
    .await?)
}

/// Captains who gave the ride back after accepting it.
pub(super) async fn withdrawn(
    conn: &mut PgConnection,
    id: RideId,
) -> Result<Vec<CaptainId>, StoreError> {
    Ok(sqlx::query_scalar(
        "SELECT captain_id FROM ride_offers \
         WHERE ride_id = $1 AND withdrawn_at IS NOT NULL \
         ORDER BY withdrawn_at, captain_id",
    )
    .bind(id)
    .fetch_all(conn)
    .await?)
}

pub(super) async fn has_withdrawn(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
) -> Result<bool, StoreError> {
    Ok(sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM ride_offers \
                        WHERE ride_id = $1 AND captain_id = $2 AND withdrawn_at IS NOT NULL)",
    )
    .bind(id)
    .bind(captain_id)
    .fetch_one(conn)
    .await?)
}

/// Stamp the captain's offer as withdrawn, creating it if the ride was
/// assigned without one.
pub(super) async fn mark_withdrawn(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "INSERT INTO ride_offers (ride_id, captain_id, offered_at, withdrawn_at) \
         VALUES ($1, $2, $3, $3) \
         ON CONFLICT (ride_id, captain_id) DO UPDATE SET withdrawn_at = EXCLUDED.withdrawn_at",
    )
    .bind(id)
    .bind(captain_id)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}

/// `requested → accepted` for a ride with no captain, unless this captain
/// already gave it back once.
pub(super) async fn claim(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
    now: DateTime<Utc>,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> = sqlx::query_as(&format!(
        "UPDATE rides SET status = 'accepted', captain_id = $2, accepted_at = $3, updated_at = $3 \
         WHERE id = $1 AND status = 'requested' AND captain_id IS NULL \
           AND NOT EXISTS (SELECT 1 FROM ride_offers o \
                           WHERE o.ride_id = $1 AND o.captain_id = $2 \
                             AND o.withdrawn_at IS NOT NULL) \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(id)
    .bind(captain_id)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    decode(row)
}

/// Take one OTP check from an `accepted` ride's budget of `max_attempts`.
pub(super) async fn reserve_otp_attempt(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
    max_attempts: i32,
    now: DateTime<Utc>,
) -> Result<Option<i32>, StoreError> {
    Ok(sqlx::query_scalar(
        "UPDATE rides SET otp_attempts = otp_attempts + 1, updated_at = $4 \
         WHERE id = $1 AND captain_id = $2 AND status = 'accepted' AND otp_attempts < $3 \
         RETURNING otp_attempts",
    )
    .bind(id)
    .bind(captain_id)
    .bind(max_attempts)
    .bind(now)
    .fetch_optional(conn)
    .await?)
}

/// Advance the assigned captain's ride from `from` to `to`.
pub(super) async fn advance(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
    from: RideStatus,
    to: RideStatus,
    now: DateTime<Utc>,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> = sqlx::query_as(&format!(
        "UPDATE rides SET status = $4, updated_at = $5, \
                started_at = CASE WHEN $4 = 'started'::ride_status THEN $5 ELSE started_at END, \
                completed_at = CASE WHEN $4 = 'completed'::ride_status THEN $5 ELSE completed_at END \
         WHERE id = $1 AND captain_id = $2 AND status = $3 \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(id)
    .bind(captain_id)
    .bind(from)
    .bind(to)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    decode(row)
}

/// `accepted → requested`, clearing the captain.
pub(super) async fn reopen(
    conn: &mut PgConnection,
    id: RideId,
    captain_id: CaptainId,
    now: DateTime<Utc>,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> = sqlx::query_as(&format!(
        "UPDATE rides SET status = 'requested', captain_id = NULL, accepted_at = NULL, \
                          updated_at = $3 \
         WHERE id = $1 AND captain_id = $2 AND status = 'accepted' \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(id)
    .bind(captain_id)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    decode(row)
}

/// Close a ride that never started: cancelled (`requested|accepted`) or
/// expired (`requested` only).
pub(super) async fn close(
    conn: &mut PgConnection,
    id: RideId,
    to: RideStatus,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<Ride>, StoreError> {
    let row: Option<RideRow> = sqlx::query_as(&format!(
        "UPDATE rides SET status = $2, cancel_reason = $3, cancelled_at = $4, updated_at = $4 \
         WHERE id = $1 \
           AND (status = 'requested' OR ($2 = 'cancelled'::ride_status AND status = 'accepted')) \
         RETURNING {RIDE_COLUMNS}"
    ))
    .bind(id)
    .bind(to)
    .bind(reason)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    decode(row)
}

pub(super) async fn stale_requested(
    conn: &mut PgConnection,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Ride>, StoreError> {
    let rows: Vec<RideRow> = sqlx::query_as(&format!(
        "SELECT {RIDE_COLUMNS} FROM rides \
         WHERE status = 'requested' AND COALESCE(last_dispatched_at, created_at) < $1 \
         ORDER BY COALESCE(last_dispatched_at, created_at)"
    ))
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(Ride::try_from).collect()
}
