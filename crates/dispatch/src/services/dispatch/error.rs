//! Dispatch service errors.

use thiserror::Error;
use tiffin_core::{FareError, Money, OrderStatus, RideStatus};

use crate::store::StoreError;

/// Errors returned by [`super::DispatchService`].
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Persistence failed.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Fare or settlement math failed.
    #[error("pricing error: {0}")]
    Pricing(#[from] FareError),

    /// The entity does not exist.
    #[error("{0} not found")]
    NotFound(&'static str),

    /// The caller is not a party to the entity.
    #[error("forbidden")]
    Forbidden,

    /// Malformed input.
    #[error("{0}")]
    Validation(String),

    /// Another captain accepted first.
    #[error("ride already taken")]
    RideAlreadyTaken,

    /// The captain is offline or already on a ride.
    #[error("captain is not available")]
    CaptainUnavailable,

    /// Availability cannot change mid-ride.
    #[error("captain is on a ride")]
    CaptainOnRide,

    /// The captain was never offered this ride, or gave it back.
    #[error("ride was not offered to this captain")]
    NotOffered,

    /// The ride's state does not allow the operation.
    #[error("ride is {actual}")]
    InvalidRideState {
        /// State found.
        actual: RideStatus,
    },

    /// The order's state does not allow the operation.
    #[error("order is {actual}")]
    InvalidOrderState {
        /// State found.
        actual: OrderStatus,
    },

    /// Wrong start code.
    #[error("invalid otp, {remaining} attempts remaining")]
    InvalidOtp {
        /// Attempts left before lockout.
        remaining: u32,
    },

    /// Too many wrong start codes.
    #[error("too many invalid otp attempts")]
    OtpLocked,

    /// A payout exceeds the balance.
    #[error("insufficient balance: {balance}")]
    InsufficientBalance {
        /// Balance at the time of the request.
        balance: Money,
    },

    /// A prepaid order has not been paid.
    #[error("order has not been paid")]
    PaymentRequired,
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => Self::NotFound("record"),
            StoreError::RideState { actual } => Self::InvalidRideState { actual },
            StoreError::OrderState { actual } => Self::InvalidOrderState { actual },
            StoreError::RideUnavailable => Self::RideAlreadyTaken,
            StoreError::OfferWithdrawn => Self::NotOffered,
            StoreError::OtpLocked => Self::OtpLocked,
            StoreError::CaptainUnavailable => Self::CaptainUnavailable,
            StoreError::CaptainOnRide => Self::CaptainOnRide,
            StoreError::NotAssigned => Self::Forbidden,
            StoreError::InsufficientBalance { balance } => Self::InsufficientBalance { balance },
            other @ (StoreError::Conflict(_)
            | StoreError::DataCorruption(_)
            | StoreError::Database(_)) => Self::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflicts_map_to_domain_errors() {
        assert!(matches!(
            DispatchError::from(StoreError::RideUnavailable),
            DispatchError::RideAlreadyTaken
        ));
        assert!(matches!(
            DispatchError::from(StoreError::RideState {
                actual: RideStatus::Completed
            }),
            DispatchError::InvalidRideState {
                actual: RideStatus::Completed
            }
        ));
        assert!(matches!(
            DispatchError::from(StoreError::NotAssigned),
            DispatchError::Forbidden
        ));
        assert!(matches!(
            DispatchError::from(StoreError::OfferWithdrawn),
            DispatchError::NotOffered
        ));
        assert!(matches!(
            DispatchError::from(StoreError::Conflict("dup".to_owned())),
            DispatchError::Store(_)
        ));
    }
}
