//! Inputs and results of dispatch operations.

use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainId, GeoPoint, Money, PaymentMethod, RideId, Settlement, ShopId};

use crate::models::{AccountAudit, LedgerEntry, OrderItem, Ride};

/// A user's checkout request.
#[derive(Debug, Clone, Deserialize)]
pub struct PlaceOrder {
    /// Shop to order from.
    pub shop_id: ShopId,
    /// Cart lines.
    pub items: Vec<OrderItem>,
    /// Delivery coordinates.
    pub dropoff: GeoPoint,
    /// Human-readable shipping address.
    pub address: String,
    /// How the user pays.
    #[serde(default)]
    pub payment_method: PaymentMethod,
    /// Processor reference for prepaid orders.
    #[serde(default)]
    pub payment_reference: Option<String>,
}

/// Result of one dispatch round.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    /// Ride dispatched.
    pub ride_id: RideId,
    /// Round number, starting at 1.
    pub round: i32,
    /// Captains offered the ride this round, nearest first.
    pub candidates: Vec<CaptainId>,
    /// Offers that reached the captain.
    pub delivered: usize,
    /// Offers that exhausted their retries.
    pub failed: usize,
}

/// What a cancel request did.
#[derive(Debug, Clone)]
pub enum CancelOutcome {
    /// The ride (and its order) are cancelled.
    Cancelled(Ride),
    /// The assigned captain withdrew; the ride is looking for another.
    Reopened(Ride),
}

impl CancelOutcome {
    /// The ride after the change.
    #[must_use]
    pub const fn ride(&self) -> &Ride {
        match self {
            Self::Cancelled(ride) | Self::Reopened(ride) => ride,
        }
    }
}

/// A settled ride.
#[derive(Debug, Clone)]
pub struct CompletionReceipt {
    /// The completed ride.
    pub ride: Ride,
    /// How the payment was split.
    pub settlement: Settlement,
}

/// A captain's earnings summary.
#[derive(Debug, Clone, Serialize)]
pub struct CaptainEarnings {
    /// Captain.
    pub captain_id: CaptainId,
    /// Current balance.
    pub balance: Money,
    /// Total ever earned.
    pub lifetime_earnings: Money,
    /// Rides settled.
    pub rides_completed: i32,
    /// Latest ledger entries, newest first.
    pub recent_entries: Vec<LedgerEntry>,
}

/// A shop's balance with its ledger check.
#[derive(Debug, Clone, Serialize)]
pub struct ShopBalance {
    /// Shop.
    pub shop_id: ShopId,
    /// Current balance.
    pub balance: Money,
    /// Stored balance compared with the entry sum.
    pub audit: AccountAudit,
}

/// Totals from one stale ride sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Rides given another dispatch round.
    pub redispatched: usize,
    /// Rides that ran out of rounds.
    pub expired: usize,
}
