//! Type-safe money using decimal arithmetic.
//!
//! All amounts are in the marketplace currency's standard unit (rupees, not
//! paise). Floating point never touches a balance: fares are computed from
//! `Decimal` inputs and every stored amount is rounded to whole cents with
//! [`Money::round_cents`].

use core::fmt;
use core::iter::Sum;
use core::ops::{Add, Neg, Sub};

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Basis points in one whole (100%).
pub const BPS_DENOMINATOR: u32 = 10_000;

/// A monetary amount.
///
/// Signed: ledger debits are negative amounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Money(Decimal);

impl Money {
    /// Zero.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Largest amount a `NUMERIC(14, 2)` column holds.
    pub const MAX_STORED: Self = Self(Decimal::from_parts(0x107A_3FFF, 0x5AF3, 0, false, 2));

    /// Create an amount from a decimal value.
    #[must_use]
    pub const fn new(amount: Decimal) -> Self {
        Self(amount)
    }

    /// Create an amount from an integer number of cents.
    #[must_use]
    pub fn from_cents(cents: i64) -> Self {
        Self(Decimal::new(cents, 2))
    }

    /// The underlying decimal value.
    #[must_use]
    pub const fn amount(&self) -> Decimal {
        self.0
    }

    /// Round to two decimal places, midpoints away from zero.
    #[must_use]
    pub fn round_cents(self) -> Self {
        Self(
            self.0
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero),
        )
    }

    /// Whether the amount is below zero.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }

    /// Whether the amount is exactly zero.
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Checked addition.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Multiply by a whole quantity (line totals).
    #[must_use]
    pub fn checked_mul_qty(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(Decimal::from(quantity)).map(Self)
    }

    /// Multiply by a decimal factor (per-km and per-minute rates).
    #[must_use]
    pub fn checked_mul_decimal(self, factor: Decimal) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    /// The given share in basis points, unrounded. `None` on overflow.
    #[must_use]
    pub fn bps(self, bps: u32) -> Option<Self> {
        self.0
            .checked_mul(Decimal::from(bps))
            .and_then(|share| share.checked_div(Decimal::from(BPS_DENOMINATOR)))
            .map(Self)
    }

    /// Whether the amount fits a stored money column.
    #[must_use]
    pub fn is_storable(&self) -> bool {
        self.0.abs() <= Self::MAX_STORED.0
    }

    /// The larger of two amounts.
    #[must_use]
    pub fn max(self, other: Self) -> Self {
        if self >= other { self } else { other }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl From<Decimal> for Money {
    fn from(amount: Decimal) -> Self {
        Self(amount)
    }
}

impl Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for Money {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl<'a> Sum<&'a Self> for Money {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

// SQLx support (with postgres feature): stored as NUMERIC(14, 2)
#[cfg(feature = "postgres")]
impl sqlx::Type<sqlx::Postgres> for Money {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <Decimal as sqlx::Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &sqlx::postgres::PgTypeInfo) -> bool {
        <Decimal as sqlx::Type<sqlx::Postgres>>::compatible(ty)
    }
}

#[cfg(feature = "postgres")]
impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Money {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let amount = <Decimal as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Ok(Self(amount))
    }
}

#[cfg(feature = "postgres")]
impl sqlx::Encode<'_, sqlx::Postgres> for Money {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <Decimal as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&self.0, buf)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cents() {
        assert_eq!(Money::from_cents(1999).to_string(), "19.99");
        assert_eq!(Money::from_cents(-50).to_string(), "-0.50");
    }

    #[test]
    fn test_round_cents_midpoint_away_from_zero() {
        let m = Money::new(Decimal::new(12345, 3)); // 12.345
        assert_eq!(m.round_cents(), Money::from_cents(1235));
        let n = Money::new(Decimal::new(-12345, 3));
        assert_eq!(n.round_cents(), Money::from_cents(-1235));
    }

    #[test]
    fn test_bps_share() {
        let m = Money::from_cents(10_000); // 100.00
        assert_eq!(m.bps(1_000), Some(Money::from_cents(1_000)));
        assert_eq!(m.bps(0), Some(Money::ZERO));
        assert_eq!(m.bps(BPS_DENOMINATOR), Some(m));
    }

    #[test]
    fn test_bps_overflow_is_none() {
        assert_eq!(Money::new(Decimal::MAX).bps(1_000), None);
    }

    #[test]
    fn test_max_stored() {
        assert_eq!(Money::MAX_STORED.to_string(), "999999999999.99");
        assert!(Money::MAX_STORED.is_storable());
        assert!((-Money::MAX_STORED).is_storable());
        assert!(!(Money::MAX_STORED + Money::from_cents(1)).is_storable());
    }

    #[test]
    fn test_negative_and_zero() {
        assert!(Money::from_cents(-1).is_negative());
        assert!(!Money::ZERO.is_negative());
        assert!(Money::ZERO.is_zero());
    }

    #[test]
    fn test_sum_and_qty() {
        let items = [Money::from_cents(250), Money::from_cents(175)];
        assert_eq!(items.iter().sum::<Money>(), Money::from_cents(425));
        assert_eq!(
            Money::from_cents(250).checked_mul_qty(3).unwrap(),
            Money::from_cents(750)
        );
    }

    #[test]
    fn test_serde_uses_string_decimal() {
        let json = serde_json::to_string(&Money::from_cents(1050)).unwrap();
        assert_eq!(json, "\"10.50\"");
        let back: Money = serde_json::from_str("\"10.50\"").unwrap();
        assert_eq!(back, Money::from_cents(1050));
    }
}
