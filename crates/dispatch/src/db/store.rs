//! [`DispatchStore`] operations as `PostgreSQL` transactions.

use chrono::{DateTime, Utc};
use tracing::instrument;

use tiffin_core::{
    CaptainAvailability, CaptainId, GeoPoint, Money, OrderId, OrderStatus, RideId, RideStatus,
    Settlement, ShopId, UserId,
};

use super::{PgStore, ledger, notifications, orders, parties, rides};
use crate::models::{
    Captain, EntryKind, LedgerAccount, LedgerEntry, NearbyCaptain, NewCaptain, NewOrder, NewRide,
    NewShop, NewUser, NotificationRecord, Order, Ride, Shop, User,
};
use crate::store::{DispatchStore, StoreError};

impl DispatchStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_user(&self, new: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        parties::insert_user(&mut *self.pool.acquire().await?, new, now).await
    }

    async fn insert_shop(&self, new: &NewShop, now: DateTime<Utc>) -> Result<Shop, StoreError> {
        parties::insert_shop(&mut *self.pool.acquire().await?, new, now).await
    }

    async fn insert_captain(
        &self,
        new: &NewCaptain,
        now: DateTime<Utc>,
    ) -> Result<Captain, StoreError> {
        parties::insert_captain(&mut *self.pool.acquire().await?, new, now).await
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        parties::user(&mut *self.pool.acquire().await?, id).await
    }

    async fn shop(&self, id: ShopId) -> Result<Option<Shop>, StoreError> {
        if let Some(shop) = self.shops.get(&id).await {
            return Ok(Some(shop));
        }
        let shop = parties::shop(&mut *self.pool.acquire().await?, id).await?;
        if let Some(shop) = &shop {
            self.shops.insert(id, shop.clone()).await;
        }
        Ok(shop)
    }

    async fn captain(&self, id: CaptainId) -> Result<Option<Captain>, StoreError> {
        parties::captain(&mut *self.pool.acquire().await?, id).await
    }

    async fn insert_order(&self, new: &NewOrder, now: DateTime<Utc>) -> Result<Order, StoreError> {
        orders::insert(&mut *self.pool.acquire().await?, new, now).await
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        orders::get(&mut *self.pool.acquire().await?, id).await
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn cancel_pending_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut tx = self.pool.begin().await?;
        if let Some(order) =
            orders::transition(&mut *tx, id, OrderStatus::Pending, OrderStatus::Cancelled, now)
                .await?
        {
            tx.commit().await?;
            return Ok(order);
        }
        let order = orders::get(&mut *tx, id).await?.ok_or(StoreError::NotFound)?;
        Err(StoreError::OrderState {
            actual: order.status,
        })
    }

    #[instrument(skip(self, ride), fields(order_id = %id))]
    async fn confirm_order(
        &self,
        id: OrderId,
        ride: &NewRide,
    ) -> Result<(Order, Ride), StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(order) = orders::transition(
            &mut *tx,
            id,
            OrderStatus::Pending,
            OrderStatus::Confirmed,
            ride.created_at,
        )
        .await?
        else {
            let order = orders::get(&mut *tx, id).await?.ok_or(StoreError::NotFound)?;
            return Err(StoreError::OrderState {
                actual: order.status,
            });
        };
        let ride = rides::insert(&mut *tx, ride).await?;
        tx.commit().await?;
        Ok((order, ride))
    }

    async fn insert_ride(&self, ride: &NewRide) -> Result<Ride, StoreError> {
        rides::insert(&mut *self.pool.acquire().await?, ride).await
    }

    async fn ride(&self, id: RideId) -> Result<Option<Ride>, StoreError> {
        rides::get(&mut *self.pool.acquire().await?, id).await
    }

    async fn ride_for_order(&self, order_id: OrderId) -> Result<Option<Ride>, StoreError> {
        rides::for_order(&mut *self.pool.acquire().await?, order_id).await
    }

    async fn available_captains_within(
        &self,
        center: GeoPoint,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NearbyCaptain>, StoreError> {
        parties::available_within(
            &mut *self.pool.acquire().await?,
            center,
            radius_km,
            fresh_since,
            limit,
        )
        .await
    }

    #[instrument(skip(self, captains), fields(ride_id = %ride_id, offers = captains.len()))]
    async fn record_offers(
        &self,
        ride_id: RideId,
        captains: &[CaptainId],
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::stamp_dispatch(&mut *tx, ride_id, now).await? else {
            return Err(rides::diagnose(&mut *tx, ride_id, RideStatus::Requested).await?);
        };
        if !captains.is_empty() {
            rides::insert_offers(&mut *tx, ride_id, captains, now).await?;
        }
        tx.commit().await?;
        Ok(ride)
    }

    async fn ride_offers(&self, ride_id: RideId) -> Result<Vec<CaptainId>, StoreError> {
        rides::offers(&mut *self.pool.acquire().await?, ride_id).await
    }

    async fn withdrawn_captains(&self, ride_id: RideId) -> Result<Vec<CaptainId>, StoreError> {
        rides::withdrawn(&mut *self.pool.acquire().await?, ride_id).await
    }

    #[instrument(skip(self), fields(ride_id = %ride_id, captain_id = %captain_id))]
    async fn assign_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::claim(&mut *tx, ride_id, captain_id, now).await? else {
            if rides::get(&mut *tx, ride_id).await?.is_none() {
                return Err(StoreError::NotFound);
            }
            return Err(if rides::has_withdrawn(&mut *tx, ride_id, captain_id).await? {
                StoreError::OfferWithdrawn
            } else {
                StoreError::RideUnavailable
            });
        };
        if !parties::occupy(&mut *tx, captain_id).await? {
            return Err(match parties::captain(&mut *tx, captain_id).await? {
                None => StoreError::NotFound,
                Some(_) => StoreError::CaptainUnavailable,
            });
        }
        tx.commit().await?;
        Ok(ride)
    }

    async fn reserve_otp_attempt(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let max = i32::try_from(max_attempts).unwrap_or(i32::MAX);
        let mut conn = self.pool.acquire().await?;
        if let Some(used) =
            rides::reserve_otp_attempt(&mut *conn, ride_id, captain_id, max, now).await?
        {
            return Ok(u32::try_from(used).unwrap_or(0));
        }
        let ride = rides::get(&mut *conn, ride_id)
            .await?
            .ok_or(StoreError::NotFound)?;
        Err(if ride.status != RideStatus::Accepted {
            StoreError::RideState {
                actual: ride.status,
            }
        } else if !ride.is_assigned_to(captain_id) {
            StoreError::NotAssigned
        } else {
            StoreError::OtpLocked
        })
    }

    #[instrument(skip(self), fields(ride_id = %ride_id, captain_id = %captain_id))]
    async fn mark_started(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::advance(
            &mut *tx,
            ride_id,
            captain_id,
            RideStatus::Accepted,
            RideStatus::Started,
            now,
        )
        .await?
        else {
            return Err(rides::diagnose(&mut *tx, ride_id, RideStatus::Accepted).await?);
        };
        if let Some(order_id) = ride.order_id {
            orders::follow_ride(&mut *tx, order_id, OrderStatus::OutForDelivery, now).await?;
        }
        tx.commit().await?;
        Ok(ride)
    }

    #[instrument(skip(self), fields(ride_id = %ride_id, captain_id = %captain_id))]
    async fn settle_ride(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::advance(
            &mut *tx,
            ride_id,
            captain_id,
            RideStatus::Started,
            RideStatus::Completed,
            now,
        )
        .await?
        else {
            return Err(rides::diagnose(&mut *tx, ride_id, RideStatus::Started).await?);
        };

        parties::credit_ride(&mut *tx, captain_id, settlement.captain_earning).await?;
        ledger::insert(
            &mut *tx,
            LedgerAccount::Captain(captain_id),
            EntryKind::RideEarning,
            settlement.captain_earning,
            Some(ride_id),
            None,
            now,
        )
        .await?;

        let shop_id = match (ride.order_id, ride.shop_id) {
            (Some(_), Some(shop_id)) => Some(shop_id),
            _ if settlement.shop_payout.is_zero() => None,
            _ => {
                return Err(StoreError::DataCorruption(format!(
                    "ride {ride_id} has a shop payout but no shop"
                )));
            }
        };
        if let Some(shop_id) = shop_id {
            parties::credit_shop(&mut *tx, shop_id, settlement.shop_payout).await?;
            ledger::insert(
                &mut *tx,
                LedgerAccount::Shop(shop_id),
                EntryKind::ShopSale,
                settlement.shop_payout,
                Some(ride_id),
                None,
                now,
            )
            .await?;
        }

        parties::credit_platform(&mut *tx, settlement.platform_commission).await?;
        ledger::insert(
            &mut *tx,
            LedgerAccount::Platform,
            EntryKind::PlatformCommission,
            settlement.platform_commission,
            Some(ride_id),
            None,
            now,
        )
        .await?;

        if let Some(order_id) = ride.order_id {
            orders::follow_ride(&mut *tx, order_id, OrderStatus::Delivered, now).await?;
        }
        tx.commit().await?;

        if let Some(shop_id) = shop_id {
            self.shops.invalidate(&shop_id).await;
        }
        Ok(ride)
    }

    #[instrument(skip(self), fields(ride_id = %ride_id, captain_id = %captain_id))]
    async fn withdraw_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::reopen(&mut *tx, ride_id, captain_id, now).await? else {
            return Err(rides::diagnose(&mut *tx, ride_id, RideStatus::Accepted).await?);
        };
        rides::mark_withdrawn(&mut *tx, ride_id, captain_id, now).await?;
        parties::release(&mut *tx, captain_id).await?;
        tx.commit().await?;
        Ok(ride)
    }

    #[instrument(skip(self), fields(ride_id = %ride_id))]
    async fn cancel_ride(
        &self,
        ride_id: RideId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::close(&mut *tx, ride_id, RideStatus::Cancelled, reason, now).await?
        else {
            let ride = rides::get(&mut *tx, ride_id).await?.ok_or(StoreError::NotFound)?;
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        };
        if let Some(captain_id) = ride.captain_id {
            parties::release(&mut *tx, captain_id).await?;
        }
        if let Some(order_id) = ride.order_id {
            orders::follow_ride(&mut *tx, order_id, OrderStatus::Cancelled, now).await?;
        }
        tx.commit().await?;
        Ok(ride)
    }

    #[instrument(skip(self), fields(ride_id = %ride_id))]
    async fn expire_ride(&self, ride_id: RideId, now: DateTime<Utc>) -> Result<Ride, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(ride) = rides::close(
            &mut *tx,
            ride_id,
            RideStatus::Expired,
            "no captain accepted",
            now,
        )
        .await?
        else {
            return Err(rides::diagnose(&mut *tx, ride_id, RideStatus::Requested).await?);
        };
        if let Some(order_id) = ride.order_id {
            orders::follow_ride(&mut *tx, order_id, OrderStatus::Cancelled, now).await?;
        }
        tx.commit().await?;
        Ok(ride)
    }

    async fn stale_requested_rides(&self, cutoff: DateTime<Utc>) -> Result<Vec<Ride>, StoreError> {
        rides::stale_requested(&mut *self.pool.acquire().await?, cutoff).await
    }

    async fn update_captain_location(
        &self,
        captain_id: CaptainId,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Captain, StoreError> {
        parties::update_location(&mut *self.pool.acquire().await?, captain_id, location, now)
            .await?
            .ok_or(StoreError::NotFound)
    }

    #[instrument(skip(self), fields(captain_id = %captain_id, availability = %availability))]
    async fn set_captain_availability(
        &self,
        captain_id: CaptainId,
        availability: CaptainAvailability,
    ) -> Result<Captain, StoreError> {
        let mut conn = self.pool.acquire().await?;
        if let Some(captain) = parties::set_availability(&mut conn, captain_id, availability).await?
        {
            return Ok(captain);
        }
        match parties::captain(&mut conn, captain_id).await? {
            None => Err(StoreError::NotFound),
            Some(_) => Err(StoreError::CaptainOnRide),
        }
    }

    async fn ledger_entries(
        &self,
        account: LedgerAccount,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        ledger::for_account(&mut *self.pool.acquire().await?, account, limit).await
    }

    async fn ride_ledger(&self, ride_id: RideId) -> Result<Vec<LedgerEntry>, StoreError> {
        ledger::for_ride(&mut *self.pool.acquire().await?, ride_id).await
    }

    async fn account_balance(&self, account: LedgerAccount) -> Result<Money, StoreError> {
        let mut conn = self.pool.acquire().await?;
        match account {
            LedgerAccount::Captain(id) => parties::captain(&mut conn, id)
                .await?
                .map(|c| c.earnings_balance)
                .ok_or(StoreError::NotFound),
            LedgerAccount::Shop(id) => parties::shop(&mut conn, id)
                .await?
                .map(|s| s.balance)
                .ok_or(StoreError::NotFound),
            LedgerAccount::Platform => parties::platform_balance(&mut conn).await,
        }
    }

    async fn ledger_total(&self, account: LedgerAccount) -> Result<Money, StoreError> {
        ledger::total(&mut *self.pool.acquire().await?, account).await
    }

    #[instrument(skip(self, memo), fields(shop_id = %shop_id, amount = %amount))]
    async fn record_payout(
        &self,
        shop_id: ShopId,
        amount: Money,
        memo: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.pool.begin().await?;
        if parties::debit_shop(&mut *tx, shop_id, amount).await?.is_none() {
            let shop = parties::shop(&mut *tx, shop_id)
                .await?
                .ok_or(StoreError::NotFound)?;
            return Err(StoreError::InsufficientBalance {
                balance: shop.balance,
            });
        }
        let entry = ledger::insert(
            &mut *tx,
            LedgerAccount::Shop(shop_id),
            EntryKind::Payout,
            -amount,
            None,
            memo,
            now,
        )
        .await?;
        tx.commit().await?;
        self.shops.invalidate(&shop_id).await;
        Ok(entry)
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        notifications::insert(&mut *self.pool.acquire().await?, record).await
    }
}
