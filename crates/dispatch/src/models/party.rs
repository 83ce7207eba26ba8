//! Marketplace parties: users, shops and captains.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainAvailability, CaptainId, GeoPoint, Money, ShopId, UserId};

/// A shopper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique user ID.
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Contact number shown to the assigned captain.
    pub phone: String,
    /// When the user was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for seeding a user.
#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    /// Display name.
    pub name: String,
    /// Contact number.
    pub phone: String,
}

/// A restaurant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shop {
    /// Unique shop ID.
    pub id: ShopId,
    /// Display name.
    pub name: String,
    /// Pickup point for every ride this shop creates.
    pub location: GeoPoint,
    /// Ledger balance owed to the shop.
    pub balance: Money,
    /// When the shop was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for seeding a shop.
#[derive(Debug, Clone, Deserialize)]
pub struct NewShop {
    /// Display name.
    pub name: String,
    /// Pickup point.
    pub location: GeoPoint,
}

/// A delivery rider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Captain {
    /// Unique captain ID.
    pub id: CaptainId,
    /// Display name.
    pub name: String,
    /// Vehicle description shown to users (e.g. "scooter KA-01-1234").
    pub vehicle: String,
    /// Last reported position.
    pub location: Option<GeoPoint>,
    /// When `location` was reported.
    pub location_updated_at: Option<DateTime<Utc>>,
    /// Dispatch eligibility.
    pub availability: CaptainAvailability,
    /// Rides settled.
    pub rides_completed: i32,
    /// Total ever credited from rides.
    pub lifetime_earnings: Money,
    /// Current ledger balance.
    pub earnings_balance: Money,
    /// When the captain was created.
    pub created_at: DateTime<Utc>,
}

/// Fields for seeding a captain.
#[derive(Debug, Clone, Deserialize)]
pub struct NewCaptain {
    /// Display name.
    pub name: String,
    /// Vehicle description.
    pub vehicle: String,
}

/// A captain found by a radius search.
#[derive(Debug, Clone)]
pub struct NearbyCaptain {
    /// The captain.
    pub captain: Captain,
    /// Great-circle distance from the search center.
    pub distance_km: f64,
}
