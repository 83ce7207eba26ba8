//! Queries for users, shops, captains and the platform account.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;

use tiffin_core::{CaptainAvailability, CaptainId, GeoPoint, Money, ShopId, UserId};

use super::point;
use crate::models::{Captain, NearbyCaptain, NewCaptain, NewShop, NewUser, Shop, User};
use crate::store::StoreError;

#[derive(sqlx::FromRow)]
struct UserRow {
    id: UserId,
    name: String,
    phone: String,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(r: UserRow) -> Self {
        Self {
            id: r.id,
            name: r.name,
            phone: r.phone,
            created_at: r.created_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ShopRow {
    id: ShopId,
    name: String,
    lat: f64,
    lng: f64,
    balance: Money,
    created_at: DateTime<Utc>,
}

impl TryFrom<ShopRow> for Shop {
    type Error = StoreError;

    fn try_from(r: ShopRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            name: r.name,
            location: point("shop location", r.lat, r.lng)?,
            balance: r.balance,
            created_at: r.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CaptainRow {
    id: CaptainId,
    name: String,
    vehicle: String,
    lat: Option<f64>,
    lng: Option<f64>,
    location_updated_at: Option<DateTime<Utc>>,
    availability: CaptainAvailability,
    rides_completed: i32,
    lifetime_earnings: Money,
    earnings_balance: Money,
    created_at: DateTime<Utc>,
}

impl TryFrom<CaptainRow> for Captain {
    type Error = StoreError;

    fn try_from(r: CaptainRow) -> Result<Self, Self::Error> {
        let location = match (r.lat, r.lng) {
            (Some(lat), Some(lng)) => Some(point("captain location", lat, lng)?),
            (None, None) => None,
            _ => {
                return Err(StoreError::DataCorruption(format!(
                    "captain {} has a partial location",
                    r.id
                )));
            }
        };
        Ok(Self {
            id: r.id,
            name: r.name,
            vehicle: r.vehicle,
            location,
            location_updated_at: r.location_updated_at,
            availability: r.availability,
            rides_completed: r.rides_completed,
            lifetime_earnings: r.lifetime_earnings,
            earnings_balance: r.earnings_balance,
            created_at: r.created_at,
        })
    }
}

const CAPTAIN_COLUMNS: &str = "id, name, vehicle, lat, lng, location_updated_at, availability, \
     rides_completed, lifetime_earnings, earnings_balance, created_at";

pub(super) async fn insert_user(
    conn: &mut PgConnection,
    new: &NewUser,
    now: DateTime<Utc>,
) -> Result<User, StoreError> {
    let row: UserRow = sqlx::query_as(
        "INSERT INTO users (name, phone, created_at) VALUES ($1, $2, $3) \
         RETURNING id, name, phone, created_at",
    )
    .bind(&new.name)
    .bind(&new.phone)
    .bind(now)
    .fetch_one(conn)
    .await?;
    Ok(row.into())
}

pub(super) async fn user(conn: &mut PgConnection, id: UserId) -> Result<Option<User>, StoreError> {
    let row: Option<UserRow> =
        sqlx::query_as("SELECT id, name, phone, created_at FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(User::from))
}

pub(super) async fn insert_shop(
    conn: &mut PgConnection,
    new: &NewShop,
    now: DateTime<Utc>,
) -> Result<Shop, StoreError> {
    let row: ShopRow = sqlx::query_as(
        "INSERT INTO shops (name, lat, lng, created_at) VALUES ($1, $2, $3, $4) \
         RETURNING id, name, lat, lng, balance, created_at",
    )
    .bind(&new.name)
    .bind(new.location.lat())
    .bind(new.location.lng())
    .bind(now)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub(super) async fn shop(conn: &mut PgConnection, id: ShopId) -> Result<Option<Shop>, StoreError> {
    let row: Option<ShopRow> =
        sqlx::query_as("SELECT id, name, lat, lng, balance, created_at FROM shops WHERE id = $1")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    row.map(Shop::try_from).transpose()
}

/// Add to a shop's balance.
pub(super) async fn credit_shop(
    conn: &mut PgConnection,
    id: ShopId,
    amount: Money,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE shops SET balance = balance + $2 WHERE id = $1")
        .bind(id)
        .bind(amount)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Subtract from a shop's balance if it covers `amount`; returns the new
/// balance, or `None` when the shop is missing or the balance is too low.
pub(super) async fn debit_shop(
    conn: &mut PgConnection,
    id: ShopId,
    amount: Money,
) -> Result<Option<Money>, StoreError> {
    let balance: Option<Money> = sqlx::query_scalar(
        "UPDATE shops SET balance = balance - $2 WHERE id = $1 AND balance >= $2 RETURNING balance",
    )
    .bind(id)
    .bind(amount)
    .fetch_optional(conn)
    .await?;
    Ok(balance)
}

pub(super) async fn insert_captain(
    conn: &mut PgConnection,
    new: &NewCaptain,
    now: DateTime<Utc>,
) -> Result<Captain, StoreError> {
    let row: CaptainRow = sqlx::query_as(&format!(
        "INSERT INTO captains (name, vehicle, created_at) VALUES ($1, $2, $3) \
         RETURNING {CAPTAIN_COLUMNS}"
    ))
    .bind(&new.name)
    .bind(&new.vehicle)
    .bind(now)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub(super) async fn captain(
    conn: &mut PgConnection,
    id: CaptainId,
) -> Result<Option<Captain>, StoreError> {
    let row: Option<CaptainRow> =
        sqlx::query_as(&format!("SELECT {CAPTAIN_COLUMNS} FROM captains WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    row.map(Captain::try_from).transpose()
}

/// Available captains with a fresh location inside `radius_km` of `center`,
/// nearest first.
///
/// The bounding box narrows the scan in SQL; the exact great-circle distance
/// is applied afterwards.
pub(super) async fn available_within(
    conn: &mut PgConnection,
    center: GeoPoint,
    radius_km: f64,
    fresh_since: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<NearbyCaptain>, StoreError> {
    let bbox = center.bounding_box(radius_km);
    let rows: Vec<CaptainRow> = sqlx::query_as(&format!(
        "SELECT {CAPTAIN_COLUMNS} FROM captains \
         WHERE availability = 'available' \
           AND location_updated_at >= $1 \
           AND lat BETWEEN $2 AND $3 \
           AND lng BETWEEN $4 AND $5"
    ))
    .bind(fresh_since)
    .bind(bbox.min_lat)
    .bind(bbox.max_lat)
    .bind(bbox.min_lng)
    .bind(bbox.max_lng)
    .fetch_all(conn)
    .await?;

    let mut nearby = Vec::with_capacity(rows.len());
    for row in rows {
        let captain = Captain::try_from(row)?;
        let Some(location) = captain.location else {
            continue;
        };
        let distance_km = location.distance_km(&center);
        if distance_km <= radius_km {
            nearby.push(NearbyCaptain {
                captain,
                distance_km,
            });
        }
    }
    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby.truncate(limit);
    Ok(nearby)
}

pub(super) async fn update_location(
    conn: &mut PgConnection,
    id: CaptainId,
    location: GeoPoint,
    now: DateTime<Utc>,
) -> Result<Option<Captain>, StoreError> {
    let row: Option<CaptainRow> = sqlx::query_as(&format!(
        "UPDATE captains SET lat = $2, lng = $3, location_updated_at = $4 WHERE id = $1 \
         RETURNING {CAPTAIN_COLUMNS}"
    ))
    .bind(id)
    .bind(location.lat())
    .bind(location.lng())
    .bind(now)
    .fetch_optional(conn)
    .await?;
    row.map(Captain::try_from).transpose()
}

/// Set availability unless the captain is on a ride.
pub(super) async fn set_availability(
    conn: &mut PgConnection,
    id: CaptainId,
    availability: CaptainAvailability,
) -> Result<Option<Captain>, StoreError> {
    let row: Option<CaptainRow> = sqlx::query_as(&format!(
        "UPDATE captains SET availability = $2 WHERE id = $1 AND availability <> 'on_ride' \
         RETURNING {CAPTAIN_COLUMNS}"
    ))
    .bind(id)
    .bind(availability)
    .fetch_optional(conn)
    .await?;
    row.map(Captain::try_from).transpose()
}

/// `available → on_ride`; returns whether the captain was claimed.
pub(super) async fn occupy(conn: &mut PgConnection, id: CaptainId) -> Result<bool, StoreError> {
    let result = sqlx::query(
        "UPDATE captains SET availability = 'on_ride' WHERE id = $1 AND availability = 'available'",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// `on_ride → available`.
pub(super) async fn release(conn: &mut PgConnection, id: CaptainId) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE captains SET availability = 'available' WHERE id = $1 AND availability = 'on_ride'",
    )
    .bind(id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Free the captain and credit a completed ride's earning.
pub(super) async fn credit_ride(
    conn: &mut PgConnection,
    id: CaptainId,
    earning: Money,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE captains SET availability = 'available', \
                rides_completed = rides_completed + 1, \
                lifetime_earnings = lifetime_earnings + $2, \
                earnings_balance = earnings_balance + $2 \
         WHERE id = $1",
    )
    .bind(id)
    .bind(earning)
    .execute(conn)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub(super) async fn platform_balance(conn: &mut PgConnection) -> Result<Money, StoreError> {
    Ok(
        sqlx::query_scalar("SELECT balance FROM platform_account WHERE id = 1")
            .fetch_one(conn)
            .await?,
    )
}

pub(super) async fn credit_platform(
    conn: &mut PgConnection,
    amount: Money,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE platform_account SET balance = balance + $1 WHERE id = 1")
        .bind(amount)
        .execute(conn)
        .await?;
    Ok(())
}
