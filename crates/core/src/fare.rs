//! Delivery fare quotes and settlement of completed rides.
//!
//! # Fare
//!
//! Route distance is the great-circle distance scaled by a road factor, since
//! riders follow streets rather than straight lines. Duration assumes a fixed
//! average speed. The fare is
//!
//! ```text
//! max(minimum, base + per_km * distance + per_minute * minutes)
//! ```
//!
//! rounded to cents.
//!
//! # Settlement
//!
//! A completed ride splits what the user paid (`subtotal + delivery_fee`)
//! three ways:
//!
//! - the shop receives the subtotal minus the shop commission
//! - the captain receives the delivery fee minus the captain commission
//! - the platform receives both commissions plus any rounding remainder
//!
//! The three shares always sum to exactly what the user paid.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};

use crate::types::{GeoPoint, Money, money::BPS_DENOMINATOR};

/// Errors from fare and settlement math.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FareError {
    /// A schedule or rate is unusable.
    #[error("invalid fare configuration: {0}")]
    InvalidConfig(String),
    /// An input amount was negative.
    #[error("amount must not be negative: {0}")]
    NegativeAmount(Money),
    /// Arithmetic left the representable range.
    #[error("fare arithmetic overflow")]
    Overflow,
}

/// Pricing parameters for delivery rides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareSchedule {
    /// Flat component of every fare.
    pub base_fare: Money,
    /// Charge per route kilometre.
    pub per_km: Money,
    /// Charge per estimated minute.
    pub per_minute: Money,
    /// Floor applied after the formula.
    pub minimum_fare: Money,
    /// Multiplier from straight-line to route distance.
    pub road_factor: Decimal,
    /// Assumed average rider speed.
    pub average_speed_kmh: Decimal,
}

impl Default for FareSchedule {
    fn default() -> Self {
        Self {
            base_fare: Money::from_cents(2_000),
            per_km: Money::from_cents(800),
            per_minute: Money::from_cents(100),
            minimum_fare: Money::from_cents(3_000),
            road_factor: Decimal::new(13, 1),
            average_speed_kmh: Decimal::from(25),
        }
    }
}

/// A priced route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareQuote {
    /// Estimated route distance, two decimal places.
    pub distance_km: Decimal,
    /// Estimated travel time, whole minutes rounded up.
    pub duration_minutes: u32,
    /// Price of the ride.
    pub fare: Money,
}

impl FareSchedule {
    /// Check that the schedule can produce sensible quotes.
    ///
    /// # Errors
    ///
    /// Returns `FareError::InvalidConfig` for negative prices, a road factor
    /// below 1, or a non-positive speed.
    pub fn validate(&self) -> Result<(), FareError> {
        for (name, value) in [
            ("base_fare", self.base_fare),
            ("per_km", self.per_km),
            ("per_minute", self.per_minute),
            ("minimum_fare", self.minimum_fare),
        ] {
            if value.is_negative() {
                return Err(FareError::InvalidConfig(format!(
                    "{name} must not be negative"
                )));
            }
        }
        if self.road_factor < Decimal::ONE {
            return Err(FareError::InvalidConfig(
                "road_factor must be at least 1".to_owned(),
            ));
        }
        if self.average_speed_kmh <= Decimal::ZERO {
            return Err(FareError::InvalidConfig(
                "average_speed_kmh must be positive".to_owned(),
            ));
        }
        Ok(())
    }

    /// Price a ride from `pickup` to `dropoff`.
    ///
    /// # Errors
    ///
    /// Returns an error if the schedule is invalid or the arithmetic overflows.
    pub fn quote(&self, pickup: &GeoPoint, dropoff: &GeoPoint) -> Result<FareQuote, FareError> {
        self.validate()?;

        let straight_km =
            Decimal::try_from(pickup.distance_km(dropoff)).map_err(|_| FareError::Overflow)?;
        let distance_km = straight_km
            .checked_mul(self.road_factor)
            .ok_or(FareError::Overflow)?
            .round_dp(2);

        let minutes = (distance_km * Decimal::from(60) / self.average_speed_kmh).ceil();
        let duration_minutes = minutes.to_u32().ok_or(FareError::Overflow)?;

        let distance_charge = self
            .per_km
            .checked_mul_decimal(distance_km)
            .ok_or(FareError::Overflow)?;
        let time_charge = self
            .per_minute
            .checked_mul_qty(duration_minutes)
            .ok_or(FareError::Overflow)?;
        let fare = self
            .base_fare
            .checked_add(distance_charge)
            .and_then(|m| m.checked_add(time_charge))
            .ok_or(FareError::Overflow)?
            .max(self.minimum_fare)
            .round_cents();

        Ok(FareQuote {
            distance_km,
            duration_minutes,
            fare,
        })
    }
}

/// Platform commission rates in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommissionRates {
    /// Taken from the order subtotal before paying the shop.
    pub shop_bps: u32,
    /// Taken from the delivery fee before paying the captain.
    pub captain_bps: u32,
}

impl Default for CommissionRates {
    fn default() -> Self {
        Self {
            shop_bps: 1_000,
            captain_bps: 2_000,
        }
    }
}

impl CommissionRates {
    /// Check that both rates are at most 100%.
    ///
    /// # Errors
    ///
    /// Returns `FareError::InvalidConfig` if a rate exceeds 10 000 bps.
    pub fn validate(&self) -> Result<(), FareError> {
        if self.shop_bps > BPS_DENOMINATOR || self.captain_bps > BPS_DENOMINATOR {
            return Err(FareError::InvalidConfig(format!(
                "commission rates must be at most {BPS_DENOMINATOR} bps"
            )));
        }
        Ok(())
    }
}

/// How a completed ride's money is split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Credited to the shop.
    pub shop_payout: Money,
    /// Credited to the captain.
    pub captain_earning: Money,
    /// Credited to the platform.
    pub platform_commission: Money,
}

impl Settlement {
    /// Split a paid order between shop, captain and platform.
    ///
    /// # Errors
    ///
    /// Returns an error for negative inputs, invalid rates, or amounts too
    /// large to split.
    pub fn compute(
        subtotal: Money,
        delivery_fee: Money,
        rates: CommissionRates,
    ) -> Result<Self, FareError> {
        rates.validate()?;
        for amount in [subtotal, delivery_fee] {
            if amount.is_negative() {
                return Err(FareError::NegativeAmount(amount));
            }
        }

        let total = subtotal
            .checked_add(delivery_fee)
            .ok_or(FareError::Overflow)?;
        let shop_commission = subtotal
            .bps(rates.shop_bps)
            .ok_or(FareError::Overflow)?
            .round_cents();
        let captain_commission = delivery_fee
            .bps(rates.captain_bps)
            .ok_or(FareError::Overflow)?
            .round_cents();

        let shop_payout = (subtotal - shop_commission).round_cents();
        let captain_earning = (delivery_fee - captain_commission).round_cents();
        let platform_commission = total - shop_payout - captain_earning;

        Ok(Self {
            shop_payout,
            captain_earning,
            platform_commission,
        })
    }

    /// Sum of all three shares.
    #[must_use]
    pub fn total(&self) -> Money {
        self.shop_payout + self.captain_earning + self.platform_commission
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn point(lat: f64, lng: f64) -> GeoPoint {
        GeoPoint::new(lat, lng).unwrap()
    }

    #[test]
    fn test_quote_short_trip_hits_minimum() {
        let schedule = FareSchedule::default();
        let q = schedule
            .quote(&point(12.9716, 77.5946), &point(12.9720, 77.5950))
            .unwrap();
        assert_eq!(q.fare, schedule.minimum_fare);
    }

    #[test]
    fn test_quote_city_trip() {
        let schedule = FareSchedule::default();
        let q = schedule
            .quote(&point(12.9716, 77.5946), &point(12.9352, 77.6245))
            .unwrap();
        // 5.1847 km straight * 1.3 = 6.74 km; 6.74 * 60 / 25 = 16.18 -> 17 min
        assert_eq!(q.distance_km, Decimal::new(674, 2));
        assert_eq!(q.duration_minutes, 17);
        // 20.00 + 8.00 * 6.74 + 1.00 * 17 = 90.92
        assert_eq!(q.fare, Money::from_cents(9_092));
    }

    #[test]
    fn test_quote_rejects_bad_schedule() {
        let schedule = FareSchedule {
            average_speed_kmh: Decimal::ZERO,
            ..FareSchedule::default()
        };
        assert!(matches!(
            schedule.quote(&point(0.0, 0.0), &point(0.0, 0.1)),
            Err(FareError::InvalidConfig(_))
        ));

        let schedule = FareSchedule {
            road_factor: Decimal::new(9, 1),
            ..FareSchedule::default()
        };
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_settlement_split() {
        let s = Settlement::compute(
            Money::from_cents(50_000),
            Money::from_cents(9_092),
            CommissionRates::default(),
        )
        .unwrap();
        assert_eq!(s.shop_payout, Money::from_cents(45_000));
        // 20% of 90.92 = 18.184 -> 18.18
        assert_eq!(s.captain_earning, Money::from_cents(7_274));
        assert_eq!(s.platform_commission, Money::from_cents(6_818));
        assert_eq!(s.total(), Money::from_cents(59_092));
    }

    #[test]
    fn test_settlement_conserves_value_with_odd_amounts() {
        for (subtotal, fee) in [(1, 1), (333, 77), (99_999, 3_001), (0, 4_550)] {
            let s = Settlement::compute(
                Money::from_cents(subtotal),
                Money::from_cents(fee),
                CommissionRates {
                    shop_bps: 1_234,
                    captain_bps: 1_777,
                },
            )
            .unwrap();
            assert_eq!(s.total(), Money::from_cents(subtotal + fee));
            assert!(!s.platform_commission.is_negative());
        }
    }

    #[test]
    fn test_settlement_overflow_is_an_error() {
        let huge = Money::new(Decimal::MAX);
        assert_eq!(
            Settlement::compute(huge, Money::ZERO, CommissionRates::default()),
            Err(FareError::Overflow)
        );
        assert_eq!(
            Settlement::compute(huge, Money::from_cents(100), CommissionRates::default()),
            Err(FareError::Overflow)
        );
    }

    #[test]
    fn test_settlement_rejects_invalid_input() {
        assert!(matches!(
            Settlement::compute(
                Money::from_cents(-1),
                Money::ZERO,
                CommissionRates::default()
            ),
            Err(FareError::NegativeAmount(_))
        ));
        assert!(
            Settlement::compute(
                Money::ZERO,
                Money::ZERO,
                CommissionRates {
                    shop_bps: 10_001,
                    captain_bps: 0
                }
            )
            .is_err()
        );
    }
}
