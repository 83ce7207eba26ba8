//! Realtime notifications with bounded retry.
//!
//! Ride state changes are pushed to the parties involved as [`Event`]s. A
//! delivery failure never affects ride state: each recipient gets up to
//! [`RetryPolicy::max_attempts`] tries with exponential backoff, and the
//! outcome of every delivery is logged and stored.
//!
//! - [`Notifier`] - transport seam; the server uses the in-process [`Hub`]
//! - [`deliver_with_retry`] / [`fan_out`] - retrying delivery to one or many
//! - [`Outbox`] - bounded background queue for fire-and-forget events

mod hub;
mod outbox;
mod retry;

use std::future::Future;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainId, GeoPoint, Money, RideId};

pub use hub::{Hub, Subscription};
pub use outbox::{Outbox, OutboxWorker};
pub use retry::{DeliveryReport, RetryPolicy, deliver_with_retry, fan_out};

pub(crate) use outbox::{channel as outbox_channel, record_reports};

use crate::models::Principal;

/// Something that happened to a ride, as pushed to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A captain is being offered a ride.
    RideOffered {
        /// Ride on offer.
        ride_id: RideId,
        /// Where to collect.
        pickup: GeoPoint,
        /// Where to deliver.
        dropoff: GeoPoint,
        /// Route distance.
        distance_km: Decimal,
        /// Fare before commission.
        fare: Money,
        /// How far the captain is from the pickup.
        pickup_distance_km: f64,
    },
    /// Another captain accepted a ride this captain was offered.
    RideTaken {
        /// Ride that is gone.
        ride_id: RideId,
    },
    /// A captain accepted the ride.
    RideAccepted {
        /// Ride accepted.
        ride_id: RideId,
        /// Who is coming.
        captain_id: CaptainId,
        /// Captain's display name.
        captain_name: String,
        /// Captain's vehicle.
        vehicle: String,
    },
    /// The captain verified the OTP and picked up.
    RideStarted {
        /// Ride started.
        ride_id: RideId,
    },
    /// Delivered and settled.
    RideCompleted {
        /// Ride completed.
        ride_id: RideId,
        /// Fare charged.
        fare: Money,
    },
    /// Cancelled by a participant.
    RideCancelled {
        /// Ride cancelled.
        ride_id: RideId,
        /// Reason given.
        reason: String,
    },
    /// The assigned captain withdrew and the ride is looking for a new one.
    RideReopened {
        /// Ride reopened.
        ride_id: RideId,
    },
    /// No captain accepted in time.
    RideExpired {
        /// Ride expired.
        ride_id: RideId,
    },
}

impl Event {
    /// The `type` tag, used in logs and the delivery log.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::RideOffered { .. } => "ride_offered",
            Self::RideTaken { .. } => "ride_taken",
            Self::RideAccepted { .. } => "ride_accepted",
            Self::RideStarted { .. } => "ride_started",
            Self::RideCompleted { .. } => "ride_completed",
            Self::RideCancelled { .. } => "ride_cancelled",
            Self::RideReopened { .. } => "ride_reopened",
            Self::RideExpired { .. } => "ride_expired",
        }
    }

    /// The ride the event concerns.
    #[must_use]
    pub const fn ride_id(&self) -> RideId {
        match self {
            Self::RideOffered { ride_id, .. }
            | Self::RideTaken { ride_id }
            | Self::RideAccepted { ride_id, .. }
            | Self::RideStarted { ride_id }
            | Self::RideCompleted { ride_id, .. }
            | Self::RideCancelled { ride_id, .. }
            | Self::RideReopened { ride_id }
            | Self::RideExpired { ride_id } => *ride_id,
        }
    }
}

/// Why one delivery attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The recipient has no open connection.
    #[error("recipient not connected")]
    NotConnected,
    /// Every connection's send queue is full.
    #[error("recipient queue full")]
    Backpressure,
    /// The transport failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Pushes events to a recipient. One call is one attempt; retries are the
/// caller's concern.
pub trait Notifier: Send + Sync + 'static {
    /// Attempt to deliver `event` to `recipient`.
    fn deliver(
        &self,
        recipient: Principal,
        event: &Event,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_shape() {
        let event = Event::RideCancelled {
            ride_id: RideId::new(4),
            reason: "changed my mind".to_owned(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "ride_cancelled", "ride_id": 4, "reason": "changed my mind"})
        );
        assert_eq!(event.name(), "ride_cancelled");
        assert_eq!(event.ride_id(), RideId::new(4));
    }

    #[test]
    fn test_offer_carries_money_as_string() {
        let event = Event::RideOffered {
            ride_id: RideId::new(1),
            pickup: GeoPoint::new(12.97, 77.59).unwrap(),
            dropoff: GeoPoint::new(12.93, 77.62).unwrap(),
            distance_km: Decimal::new(674, 2),
            fare: Money::from_cents(9_092),
            pickup_distance_km: 1.5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "ride_offered");
        assert_eq!(json["fare"], "90.92");
        assert_eq!(json["distance_km"], "6.74");
        assert_eq!(json["pickup"]["lat"], 12.97);
    }
}
