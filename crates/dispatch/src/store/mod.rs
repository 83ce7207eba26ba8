//! Persistence port for the dispatch engine.
//!
//! Every [`DispatchStore`] method is one atomic unit of work: either all of
//! its effects are visible afterwards or none are. State transitions are
//! compare-and-set: a method that moves a ride checks the ride's current
//! status in the same unit of work and fails with [`StoreError::RideState`]
//! (or one of the more specific variants) without changing anything when the
//! precondition does not hold.
//!
//! # Adapters
//!
//! - [`crate::db::PgStore`] - `PostgreSQL` via sqlx, one transaction per method
//! - [`MemoryStore`] - in-process tables behind a mutex, for tests and demos

mod memory;

use std::future::Future;

use chrono::{DateTime, Utc};
use tiffin_core::{
    CaptainAvailability, CaptainId, GeoPoint, Money, OrderId, OrderStatus, RideId, RideStatus,
    Settlement, ShopId, UserId,
};

pub use memory::MemoryStore;

use crate::models::{
    Captain, LedgerAccount, LedgerEntry, NearbyCaptain, NewCaptain, NewOrder, NewRide, NewShop,
    NewUser, NotificationRecord, Order, Ride, Shop, User,
};

/// Errors that can occur in a store operation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// The ride is not in a state that allows the transition.
    #[error("ride is {actual}")]
    RideState {
        /// Status found.
        actual: RideStatus,
    },

    /// The order is not in a state that allows the transition.
    #[error("order is {actual}")]
    OrderState {
        /// Status found.
        actual: OrderStatus,
    },

    /// The ride was claimed or closed before this accept.
    #[error("ride is no longer available")]
    RideUnavailable,

    /// The captain gave this ride back and may not claim it again.
    #[error("captain withdrew from this ride")]
    OfferWithdrawn,

    /// The ride's OTP check budget is spent.
    #[error("otp attempts exhausted")]
    OtpLocked,

    /// The captain is not available for a new ride.
    #[error("captain is not available")]
    CaptainUnavailable,

    /// The captain is on a ride and cannot change availability.
    #[error("captain is on a ride")]
    CaptainOnRide,

    /// The captain is not the one assigned to the ride.
    #[error("captain is not assigned to this ride")]
    NotAssigned,

    /// A debit would take the balance below zero.
    #[error("insufficient balance: {balance}")]
    InsufficientBalance {
        /// Balance at the time of the attempt.
        balance: Money,
    },

    /// Constraint violation (e.g., second ride for an order).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Atomic persistence operations used by the dispatch service.
pub trait DispatchStore: Send + Sync + 'static {
    /// Check the backing store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Create a user.
    fn insert_user(
        &self,
        new: &NewUser,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<User, StoreError>> + Send;

    /// Create a shop with a zero balance.
    fn insert_shop(
        &self,
        new: &NewShop,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Shop, StoreError>> + Send;

    /// Create an offline captain with no location.
    fn insert_captain(
        &self,
        new: &NewCaptain,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Captain, StoreError>> + Send;

    /// Look up a user.
    fn user(&self, id: UserId) -> impl Future<Output = Result<Option<User>, StoreError>> + Send;

    /// Look up a shop.
    fn shop(&self, id: ShopId) -> impl Future<Output = Result<Option<Shop>, StoreError>> + Send;

    /// Look up a captain.
    fn captain(
        &self,
        id: CaptainId,
    ) -> impl Future<Output = Result<Option<Captain>, StoreError>> + Send;

    /// Store a new `pending` order.
    fn insert_order(
        &self,
        new: &NewOrder,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Look up an order.
    fn order(&self, id: OrderId) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Move a `pending` order to `cancelled`.
    fn cancel_pending_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Move a `pending` order to `confirmed` and create its ride.
    ///
    /// Fails with [`StoreError::OrderState`] if the order is not pending and
    /// with [`StoreError::Conflict`] if a ride already exists for it.
    fn confirm_order(
        &self,
        id: OrderId,
        ride: &NewRide,
    ) -> impl Future<Output = Result<(Order, Ride), StoreError>> + Send;

    /// Create a `requested` ride that is not linked to an order.
    fn insert_ride(&self, ride: &NewRide) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// Look up a ride.
    fn ride(&self, id: RideId) -> impl Future<Output = Result<Option<Ride>, StoreError>> + Send;

    /// Look up the ride created for an order.
    fn ride_for_order(
        &self,
        order_id: OrderId,
    ) -> impl Future<Output = Result<Option<Ride>, StoreError>> + Send;

    /// Available captains within `radius_km` of `center` whose location was
    /// reported at or after `fresh_since`, nearest first, at most `limit`.
    fn available_captains_within(
        &self,
        center: GeoPoint,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<NearbyCaptain>, StoreError>> + Send;

    /// Record a dispatch round for a `requested` ride.
    ///
    /// Inserts an offer per captain (repeats are ignored), increments
    /// `dispatch_attempts` and stamps `last_dispatched_at`. `captains` may be
    /// empty, which still counts as a round.
    fn record_offers(
        &self,
        ride_id: RideId,
        captains: &[CaptainId],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// Every captain ever offered the ride, in offer order.
    fn ride_offers(
        &self,
        ride_id: RideId,
    ) -> impl Future<Output = Result<Vec<CaptainId>, StoreError>> + Send;

    /// Captains who withdrew from the ride after accepting it.
    fn withdrawn_captains(
        &self,
        ride_id: RideId,
    ) -> impl Future<Output = Result<Vec<CaptainId>, StoreError>> + Send;

    /// Accept-once: assign the captain to a `requested` ride.
    ///
    /// Succeeds only if the ride is `requested` with no captain, the captain
    /// has not withdrawn from it before and is `available`; the ride becomes
    /// `accepted` and the captain `on_ride`. Fails with
    /// [`StoreError::RideUnavailable`], [`StoreError::OfferWithdrawn`] or
    /// [`StoreError::CaptainUnavailable`] otherwise, changing nothing.
    fn assign_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// Take one OTP check from an `accepted` ride's budget before the code
    /// is compared, returning the checks used including this one.
    ///
    /// Fails with [`StoreError::OtpLocked`] once `max_attempts` checks have
    /// been used, so concurrent guesses can never exceed the budget.
    fn reserve_otp_attempt(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<u32, StoreError>> + Send;

    /// `accepted → started` for the assigned captain; the order goes out for
    /// delivery.
    fn mark_started(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// `started → completed` and credit every party of the settlement.
    ///
    /// Writes one ledger entry per credited account, unique per ride and
    /// entry kind, so the ride can never be credited twice.
    fn settle_ride(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// `accepted → requested`: the assigned captain gives the ride back and
    /// is recorded as withdrawn, so they are neither re-offered the ride nor
    /// able to claim it again.
    fn withdraw_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// `requested|accepted → cancelled`, freeing the captain and cancelling
    /// the order.
    fn cancel_ride(
        &self,
        ride_id: RideId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// `requested → expired`, cancelling the order.
    fn expire_ride(
        &self,
        ride_id: RideId,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Ride, StoreError>> + Send;

    /// `requested` rides last dispatched (or created, if never dispatched)
    /// before `cutoff`, oldest first.
    fn stale_requested_rides(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Ride>, StoreError>> + Send;

    /// Store a captain's reported position.
    fn update_captain_location(
        &self,
        captain_id: CaptainId,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Captain, StoreError>> + Send;

    /// Switch a captain between `offline` and `available`.
    ///
    /// Fails with [`StoreError::CaptainOnRide`] while the captain is on a ride.
    fn set_captain_availability(
        &self,
        captain_id: CaptainId,
        availability: CaptainAvailability,
    ) -> impl Future<Output = Result<Captain, StoreError>> + Send;

    /// Most recent ledger entries for an account, newest first.
    fn ledger_entries(
        &self,
        account: LedgerAccount,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>, StoreError>> + Send;

    /// Every ledger entry written for a ride.
    fn ride_ledger(
        &self,
        ride_id: RideId,
    ) -> impl Future<Output = Result<Vec<LedgerEntry>, StoreError>> + Send;

    /// Balance stored on the account row.
    fn account_balance(
        &self,
        account: LedgerAccount,
    ) -> impl Future<Output = Result<Money, StoreError>> + Send;

    /// Sum of the account's ledger entries.
    fn ledger_total(
        &self,
        account: LedgerAccount,
    ) -> impl Future<Output = Result<Money, StoreError>> + Send;

    /// Debit a shop's balance with a `payout` entry.
    fn record_payout(
        &self,
        shop_id: ShopId,
        amount: Money,
        memo: Option<&str>,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<LedgerEntry, StoreError>> + Send;

    /// Append a notification delivery outcome.
    fn record_notification(
        &self,
        record: &NotificationRecord,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;
}
