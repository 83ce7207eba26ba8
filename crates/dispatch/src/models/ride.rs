//! Delivery rides.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainId, GeoPoint, Money, OrderId, Otp, RideId, RideStatus, ShopId, UserId};

/// A delivery trip.
///
/// Not `Serialize`: the OTP must only ever reach the ride's user, so the HTTP
/// layer renders rides through a view that decides per viewer.
#[derive(Debug, Clone)]
pub struct Ride {
    /// Unique ride ID.
    pub id: RideId,
    /// The order being delivered, if any.
    pub order_id: Option<OrderId>,
    /// The user receiving the delivery.
    pub user_id: UserId,
    /// The shop the order came from, if any.
    pub shop_id: Option<ShopId>,
    /// The captain who accepted, once accepted.
    pub captain_id: Option<CaptainId>,
    /// Lifecycle state.
    pub status: RideStatus,
    /// Where the captain collects.
    pub pickup: GeoPoint,
    /// Where the captain delivers.
    pub dropoff: GeoPoint,
    /// Quoted route distance.
    pub distance_km: Decimal,
    /// Delivery fare.
    pub fare: Money,
    /// Start code held by the user.
    pub otp: Otp,
    /// Start codes checked so far, counting the one that started the ride.
    pub otp_attempts: i32,
    /// Dispatch rounds run so far.
    pub dispatch_attempts: i32,
    /// When the last dispatch round ran.
    pub last_dispatched_at: Option<DateTime<Utc>>,
    /// When a captain accepted.
    pub accepted_at: Option<DateTime<Utc>>,
    /// When the OTP was verified.
    pub started_at: Option<DateTime<Utc>>,
    /// When the ride was settled.
    pub completed_at: Option<DateTime<Utc>>,
    /// When the ride was cancelled or expired.
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Why it was cancelled.
    pub cancel_reason: Option<String>,
    /// When the ride was created.
    pub created_at: DateTime<Utc>,
    /// When the ride last changed.
    pub updated_at: DateTime<Utc>,
}

impl Ride {
    /// Whether `captain` is the assigned captain.
    #[must_use]
    pub fn is_assigned_to(&self, captain: CaptainId) -> bool {
        self.captain_id == Some(captain)
    }
}

/// A priced ride ready to be stored.
#[derive(Debug, Clone)]
pub struct NewRide {
    /// The order being delivered, if any.
    pub order_id: Option<OrderId>,
    /// The user receiving the delivery.
    pub user_id: UserId,
    /// The shop the order came from, if any.
    pub shop_id: Option<ShopId>,
    /// Where the captain collects.
    pub pickup: GeoPoint,
    /// Where the captain delivers.
    pub dropoff: GeoPoint,
    /// Quoted route distance.
    pub distance_km: Decimal,
    /// Delivery fare.
    pub fare: Money,
    /// Start code.
    pub otp: Otp,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Serializable snapshot of a ride as a given viewer may see it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideView {
    /// Ride ID.
    pub id: RideId,
    /// Linked order.
    pub order_id: Option<OrderId>,
    /// Receiving user.
    pub user_id: UserId,
    /// Originating shop.
    pub shop_id: Option<ShopId>,
    /// Assigned captain.
    pub captain_id: Option<CaptainId>,
    /// Lifecycle state.
    pub status: RideStatus,
    /// Pickup point.
    pub pickup: GeoPoint,
    /// Dropoff point.
    pub dropoff: GeoPoint,
    /// Route distance.
    pub distance_km: Decimal,
    /// Fare.
    pub fare: Money,
    /// Start code; present only for the ride's user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
    /// Cancellation reason, if cancelled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_reason: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change.
    pub updated_at: DateTime<Utc>,
}

impl RideView {
    /// Render `ride`, including the OTP only when `reveal_otp` is set.
    #[must_use]
    pub fn new(ride: &Ride, reveal_otp: bool) -> Self {
        Self {
            id: ride.id,
            order_id: ride.order_id,
            user_id: ride.user_id,
            shop_id: ride.shop_id,
            captain_id: ride.captain_id,
            status: ride.status,
            pickup: ride.pickup,
            dropoff: ride.dropoff,
            distance_km: ride.distance_km,
            fare: ride.fare,
            otp: reveal_otp.then(|| ride.otp.as_str().to_owned()),
            cancel_reason: ride.cancel_reason.clone(),
            created_at: ride.created_at,
            updated_at: ride.updated_at,
        }
    }
}
