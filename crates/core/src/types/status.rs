//! Lifecycle enums for orders, payments, rides and captains.
//!
//! The ride lifecycle is an explicit state machine:
//!
//! ```text
//!             accept              otp              complete
//! requested ─────────▶ accepted ───────▶ started ───────────▶ completed
//!   │   ▲                 │
//!   │   └──── withdraw ───┤
//!   │                     │ cancel
//!   ├──── cancel ─────────┴──────▶ cancelled
//!   └──── expire ────────────────▶ expired
//! ```
//!
//! Transitions not in this diagram are rejected by
//! [`RideStatus::can_transition_to`] and by the stores' compare-and-set
//! updates.

use serde::{Deserialize, Serialize};

/// Error returned when parsing a status from its wire name fails.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind}: {value}")]
pub struct StatusParseError {
    kind: &'static str,
    value: String,
}

macro_rules! wire_names {
    ($ty:ident, $kind:literal, { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            /// The `snake_case` wire and database name.
            #[must_use]
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name),+
                }
            }
        }

        impl ::core::fmt::Display for $ty {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl ::core::str::FromStr for $ty {
            type Err = StatusParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($name => Ok(Self::$variant),)+
                    _ => Err(StatusParseError { kind: $kind, value: s.to_owned() }),
                }
            }
        }
    };
}

/// Order fulfillment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Placed by the user, not yet accepted by the shop.
    #[default]
    Pending,
    /// Accepted by the shop; a ride exists for it.
    Confirmed,
    /// Picked up by the captain.
    OutForDelivery,
    /// Handed to the user.
    Delivered,
    /// Cancelled before pickup, or its ride expired.
    Cancelled,
}

wire_names!(OrderStatus, "order status", {
    Pending => "pending",
    Confirmed => "confirmed",
    OutForDelivery => "out_for_delivery",
    Delivered => "delivered",
    Cancelled => "cancelled",
});

impl OrderStatus {
    /// Whether the order can move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Confirmed | Self::Cancelled)
                | (Self::Confirmed, Self::OutForDelivery | Self::Cancelled)
                | (Self::OutForDelivery, Self::Delivered)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

/// How the user pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_method", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Collected by the captain at the door.
    #[default]
    CashOnDelivery,
    /// Paid online before the shop confirms.
    Prepaid,
}

wire_names!(PaymentMethod, "payment method", {
    CashOnDelivery => "cash_on_delivery",
    Prepaid => "prepaid",
});

/// Order payment status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "payment_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Not yet collected.
    #[default]
    Pending,
    /// Collected.
    Paid,
}

wire_names!(PaymentStatus, "payment status", {
    Pending => "pending",
    Paid => "paid",
});

/// Delivery ride status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "ride_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum RideStatus {
    /// Waiting for a captain.
    #[default]
    Requested,
    /// A captain has claimed the ride.
    Accepted,
    /// The captain presented the OTP and picked up.
    Started,
    /// Delivered and settled.
    Completed,
    /// Cancelled by the user or shop.
    Cancelled,
    /// No captain accepted within the dispatch budget.
    Expired,
}

wire_names!(RideStatus, "ride status", {
    Requested => "requested",
    Accepted => "accepted",
    Started => "started",
    Completed => "completed",
    Cancelled => "cancelled",
    Expired => "expired",
});

impl RideStatus {
    /// Whether the ride can move to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Requested, Self::Accepted | Self::Cancelled | Self::Expired)
                | (Self::Accepted, Self::Started | Self::Cancelled | Self::Requested)
                | (Self::Started, Self::Completed)
        )
    }

    /// Whether no further transitions are possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Expired)
    }

    /// Whether a user or shop may still cancel.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(self, Self::Requested | Self::Accepted)
    }
}

/// Captain availability for dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "captain_availability", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CaptainAvailability {
    /// Not taking rides.
    #[default]
    Offline,
    /// Online and free; eligible for offers.
    Available,
    /// Assigned to a ride.
    OnRide,
}

wire_names!(CaptainAvailability, "captain availability", {
    Offline => "offline",
    Available => "available",
    OnRide => "on_ride",
});

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ALL_RIDE: [RideStatus; 6] = [
        RideStatus::Requested,
        RideStatus::Accepted,
        RideStatus::Started,
        RideStatus::Completed,
        RideStatus::Cancelled,
        RideStatus::Expired,
    ];

    #[test]
    fn test_ride_happy_path_transitions() {
        assert!(RideStatus::Requested.can_transition_to(RideStatus::Accepted));
        assert!(RideStatus::Accepted.can_transition_to(RideStatus::Started));
        assert!(RideStatus::Started.can_transition_to(RideStatus::Completed));
    }

    #[test]
    fn test_ride_cannot_skip_states() {
        assert!(!RideStatus::Requested.can_transition_to(RideStatus::Started));
        assert!(!RideStatus::Requested.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Accepted.can_transition_to(RideStatus::Completed));
        assert!(!RideStatus::Started.can_transition_to(RideStatus::Cancelled));
    }

    #[test]
    fn test_ride_withdraw_reopens() {
        assert!(RideStatus::Accepted.can_transition_to(RideStatus::Requested));
        assert!(!RideStatus::Started.can_transition_to(RideStatus::Requested));
    }

    #[test]
    fn test_terminal_ride_states_have_no_exits() {
        for from in ALL_RIDE.into_iter().filter(|s| s.is_terminal()) {
            for to in ALL_RIDE {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_ride_status_wire_names_round_trip() {
        for status in ALL_RIDE {
            assert_eq!(status.as_str().parse::<RideStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("on_the_way".parse::<RideStatus>().is_err());
    }

    #[test]
    fn test_order_transitions() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::OutForDelivery));
        assert!(OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::OutForDelivery.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Pending));
        assert!(OrderStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_captain_availability_names() {
        assert_eq!(CaptainAvailability::OnRide.to_string(), "on_ride");
        assert_eq!(
            "available".parse::<CaptainAvailability>().unwrap(),
            CaptainAvailability::Available
        );
    }
}
