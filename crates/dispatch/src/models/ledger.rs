//! Double-entry-style ledger of money owed to captains, shops and the platform.
//!
//! Balances are stored on the owning row for fast reads, and every change to a
//! balance is written as a ledger entry in the same transaction. An
//! [`AccountAudit`] recomputes a balance from its entries.

use core::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiffin_core::{CaptainId, LedgerEntryId, Money, RideId, ShopId};

/// Whose balance an entry moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum LedgerAccount {
    /// A captain's earnings.
    Captain(CaptainId),
    /// A shop's sales.
    Shop(ShopId),
    /// Platform commission.
    Platform,
}

impl LedgerAccount {
    /// Database discriminator for the `account_kind` column.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Captain(_) => "captain",
            Self::Shop(_) => "shop",
            Self::Platform => "platform",
        }
    }

    /// Database value for the `account_id` column; the platform uses 0.
    #[must_use]
    pub const fn raw_id(&self) -> i32 {
        match self {
            Self::Captain(id) => id.as_i32(),
            Self::Shop(id) => id.as_i32(),
            Self::Platform => 0,
        }
    }

    /// Rebuild an account from its database columns.
    #[must_use]
    pub fn from_parts(kind: &str, id: i32) -> Option<Self> {
        match kind {
            "captain" => Some(Self::Captain(CaptainId::new(id))),
            "shop" => Some(Self::Shop(ShopId::new(id))),
            "platform" => Some(Self::Platform),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Platform => f.write_str("platform"),
            other => write!(f, "{}:{}", other.kind(), other.raw_id()),
        }
    }
}

/// What an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// Captain's share of a completed ride.
    RideEarning,
    /// Shop's share of a delivered order.
    ShopSale,
    /// Platform's share of a completed ride.
    PlatformCommission,
    /// Money paid out of the balance (negative amount).
    Payout,
}

/// One immutable balance movement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Entry ID.
    pub id: LedgerEntryId,
    /// Account moved.
    pub account: LedgerAccount,
    /// Reason.
    pub kind: EntryKind,
    /// Signed amount; payouts are negative.
    pub amount: Money,
    /// Ride that produced the entry, for settlement entries.
    pub ride_id: Option<RideId>,
    /// Free-form note (payout reference).
    pub memo: Option<String>,
    /// When it was written.
    pub created_at: DateTime<Utc>,
}

/// Result of recomputing an account balance from its entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAudit {
    /// Account checked.
    pub account: LedgerAccount,
    /// Balance stored on the account row.
    pub stored: Money,
    /// Sum of the account's ledger entries.
    pub computed: Money,
    /// `stored == computed`.
    pub consistent: bool,
}

impl AccountAudit {
    /// Compare a stored balance with the sum of entries.
    #[must_use]
    pub fn new(account: LedgerAccount, stored: Money, computed: Money) -> Self {
        Self {
            account,
            stored,
            computed,
            consistent: stored == computed,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_account_parts_round_trip() {
        for account in [
            LedgerAccount::Captain(CaptainId::new(7)),
            LedgerAccount::Shop(ShopId::new(3)),
            LedgerAccount::Platform,
        ] {
            let back = LedgerAccount::from_parts(account.kind(), account.raw_id()).unwrap();
            assert_eq!(back, account);
        }
        assert!(LedgerAccount::from_parts("bank", 1).is_none());
    }

    #[test]
    fn test_account_json_shape() {
        let json = serde_json::to_value(LedgerAccount::Captain(CaptainId::new(9))).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "captain", "id": 9}));
        let json = serde_json::to_value(LedgerAccount::Platform).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "platform"}));
    }

    #[test]
    fn test_audit_flags_mismatch() {
        let account = LedgerAccount::Shop(ShopId::new(1));
        assert!(AccountAudit::new(account, Money::from_cents(100), Money::from_cents(100)).consistent);
        assert!(!AccountAudit::new(account, Money::from_cents(100), Money::from_cents(99)).consistent);
    }
}
