//! In-process [`DispatchStore`] for tests and demo runs.
//!
//! All tables sit behind one async mutex, so every method is trivially atomic:
//! preconditions are checked before the first write and nothing is awaited
//! while the guard is held.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use tiffin_core::{
    CaptainAvailability, CaptainId, GeoPoint, LedgerEntryId, Money, OrderId, OrderStatus,
    PaymentStatus, RideId, RideStatus, Settlement, ShopId, UserId,
};

use super::{DispatchStore, StoreError};
use crate::models::{
    Captain, EntryKind, LedgerAccount, LedgerEntry, NearbyCaptain, NewCaptain, NewOrder, NewRide,
    NewShop, NewUser, NotificationRecord, Order, Ride, Shop, User,
};

#[derive(Debug, Default)]
struct Tables {
    seq: i32,
    users: BTreeMap<UserId, User>,
    shops: BTreeMap<ShopId, Shop>,
    captains: BTreeMap<CaptainId, Captain>,
    orders: BTreeMap<OrderId, Order>,
    rides: BTreeMap<RideId, Ride>,
    offers: BTreeMap<RideId, Vec<CaptainId>>,
    withdrawn: BTreeMap<RideId, Vec<CaptainId>>,
    ledger: Vec<LedgerEntry>,
    platform_balance: Money,
    notifications: Vec<NotificationRecord>,
}

impl Tables {
    const fn next_id(&mut self) -> i32 {
        self.seq += 1;
        self.seq
    }

    fn ride_mut(&mut self, id: RideId) -> Result<&mut Ride, StoreError> {
        self.rides.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn has_withdrawn(&self, ride_id: RideId, captain_id: CaptainId) -> bool {
        self.withdrawn
            .get(&ride_id)
            .is_some_and(|ids| ids.contains(&captain_id))
    }

    fn captain_mut(&mut self, id: CaptainId) -> Result<&mut Captain, StoreError> {
        self.captains.get_mut(&id).ok_or(StoreError::NotFound)
    }

    fn set_order_status(&mut self, order_id: Option<OrderId>, status: OrderStatus, now: DateTime<Utc>) {
        if let Some(order) = order_id.and_then(|id| self.orders.get_mut(&id)) {
            order.status = status;
            if status == OrderStatus::Delivered {
                order.payment_status = PaymentStatus::Paid;
            }
            order.updated_at = now;
        }
    }

    fn free_captain(&mut self, captain_id: Option<CaptainId>) {
        if let Some(captain) = captain_id.and_then(|id| self.captains.get_mut(&id)) {
            captain.availability = CaptainAvailability::Available;
        }
    }

    fn push_entry(
        &mut self,
        account: LedgerAccount,
        kind: EntryKind,
        amount: Money,
        ride_id: Option<RideId>,
        memo: Option<String>,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        let entry = LedgerEntry {
            id: LedgerEntryId::new(self.next_id()),
            account,
            kind,
            amount,
            ride_id,
            memo,
            created_at: now,
        };
        self.ledger.push(entry.clone());
        entry
    }

    fn balance(&self, account: LedgerAccount) -> Result<Money, StoreError> {
        match account {
            LedgerAccount::Captain(id) => self
                .captains
                .get(&id)
                .map(|c| c.earnings_balance)
                .ok_or(StoreError::NotFound),
            LedgerAccount::Shop(id) => self
                .shops
                .get(&id)
                .map(|s| s.balance)
                .ok_or(StoreError::NotFound),
            LedgerAccount::Platform => Ok(self.platform_balance),
        }
    }
}

/// [`DispatchStore`] backed by in-memory maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every notification outcome recorded so far, oldest first.
    pub async fn notifications(&self) -> Vec<NotificationRecord> {
        self.tables.lock().await.notifications.clone()
    }
}

impl DispatchStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_user(&self, new: &NewUser, now: DateTime<Utc>) -> Result<User, StoreError> {
        let mut t = self.tables.lock().await;
        let user = User {
            id: UserId::new(t.next_id()),
            name: new.name.clone(),
            phone: new.phone.clone(),
            created_at: now,
        };
        t.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn insert_shop(&self, new: &NewShop, now: DateTime<Utc>) -> Result<Shop, StoreError> {
        let mut t = self.tables.lock().await;
        let shop = Shop {
            id: ShopId::new(t.next_id()),
            name: new.name.clone(),
            location: new.location,
            balance: Money::ZERO,
            created_at: now,
        };
        t.shops.insert(shop.id, shop.clone());
        Ok(shop)
    }

    async fn insert_captain(
        &self,
        new: &NewCaptain,
        now: DateTime<Utc>,
    ) -> Result<Captain, StoreError> {
        let mut t = self.tables.lock().await;
        let captain = Captain {
            id: CaptainId::new(t.next_id()),
            name: new.name.clone(),
            vehicle: new.vehicle.clone(),
            location: None,
            location_updated_at: None,
            availability: CaptainAvailability::Offline,
            rides_completed: 0,
            lifetime_earnings: Money::ZERO,
            earnings_balance: Money::ZERO,
            created_at: now,
        };
        t.captains.insert(captain.id, captain.clone());
        Ok(captain)
    }

    async fn user(&self, id: UserId) -> Result<Option<User>, StoreError> {
        Ok(self.tables.lock().await.users.get(&id).cloned())
    }

    async fn shop(&self, id: ShopId) -> Result<Option<Shop>, StoreError> {
        Ok(self.tables.lock().await.shops.get(&id).cloned())
    }

    async fn captain(&self, id: CaptainId) -> Result<Option<Captain>, StoreError> {
        Ok(self.tables.lock().await.captains.get(&id).cloned())
    }

    async fn insert_order(&self, new: &NewOrder, now: DateTime<Utc>) -> Result<Order, StoreError> {
        let mut t = self.tables.lock().await;
        let order = Order {
            id: OrderId::new(t.next_id()),
            user_id: new.user_id,
            shop_id: new.shop_id,
            items: new.items.clone(),
            dropoff: new.dropoff,
            address: new.address.clone(),
            subtotal: new.subtotal,
            delivery_fee: new.delivery_fee,
            total: new.subtotal + new.delivery_fee,
            payment_method: new.payment_method,
            payment_status: new.payment_status,
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        t.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>, StoreError> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn cancel_pending_order(
        &self,
        id: OrderId,
        now: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        let mut t = self.tables.lock().await;
        let order = t.orders.get_mut(&id).ok_or(StoreError::NotFound)?;
        if order.status != OrderStatus::Pending {
            return Err(StoreError::OrderState {
                actual: order.status,
            });
        }
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        Ok(order.clone())
    }

    async fn confirm_order(
        &self,
        id: OrderId,
        ride: &NewRide,
    ) -> Result<(Order, Ride), StoreError> {
        let mut t = self.tables.lock().await;
        let status = t.orders.get(&id).ok_or(StoreError::NotFound)?.status;
        if status != OrderStatus::Pending {
            return Err(StoreError::OrderState { actual: status });
        }
        if t.rides.values().any(|r| r.order_id == Some(id)) {
            return Err(StoreError::Conflict(format!("order {id} already has a ride")));
        }

        let ride = new_ride(&mut t, ride);
        t.rides.insert(ride.id, ride.clone());
        let order = t.orders.get_mut(&id).ok_or(StoreError::NotFound)?;
        order.status = OrderStatus::Confirmed;
        order.updated_at = ride.created_at;
        Ok((order.clone(), ride))
    }

    async fn insert_ride(&self, ride: &NewRide) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = new_ride(&mut t, ride);
        t.rides.insert(ride.id, ride.clone());
        Ok(ride)
    }

    async fn ride(&self, id: RideId) -> Result<Option<Ride>, StoreError> {
        Ok(self.tables.lock().await.rides.get(&id).cloned())
    }

    async fn ride_for_order(&self, order_id: OrderId) -> Result<Option<Ride>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .rides
            .values()
            .find(|r| r.order_id == Some(order_id))
            .cloned())
    }

    async fn available_captains_within(
        &self,
        center: GeoPoint,
        radius_km: f64,
        fresh_since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<NearbyCaptain>, StoreError> {
        let t = self.tables.lock().await;
        let mut nearby: Vec<NearbyCaptain> = t
            .captains
            .values()
            .filter(|c| c.availability == CaptainAvailability::Available)
            .filter(|c| c.location_updated_at.is_some_and(|at| at >= fresh_since))
            .filter_map(|c| {
                let distance_km = c.location?.distance_km(&center);
                (distance_km <= radius_km).then(|| NearbyCaptain {
                    captain: c.clone(),
                    distance_km,
                })
            })
            .collect();
        nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
        nearby.truncate(limit);
        Ok(nearby)
    }

    async fn record_offers(
        &self,
        ride_id: RideId,
        captains: &[CaptainId],
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if ride.status != RideStatus::Requested {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        ride.dispatch_attempts += 1;
        ride.last_dispatched_at = Some(now);
        ride.updated_at = now;
        let ride = ride.clone();

        let offered = t.offers.entry(ride_id).or_default();
        for captain in captains {
            if !offered.contains(captain) {
                offered.push(*captain);
            }
        }
        Ok(ride)
    }

    async fn ride_offers(&self, ride_id: RideId) -> Result<Vec<CaptainId>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .offers
            .get(&ride_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn withdrawn_captains(&self, ride_id: RideId) -> Result<Vec<CaptainId>, StoreError> {
        Ok(self
            .tables
            .lock()
            .await
            .withdrawn
            .get(&ride_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn assign_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.rides.get(&ride_id).ok_or(StoreError::NotFound)?;
        if ride.status != RideStatus::Requested || ride.captain_id.is_some() {
            return Err(StoreError::RideUnavailable);
        }
        if t.has_withdrawn(ride_id, captain_id) {
            return Err(StoreError::OfferWithdrawn);
        }
        let captain = t.captain_mut(captain_id)?;
        if captain.availability != CaptainAvailability::Available {
            return Err(StoreError::CaptainUnavailable);
        }
        captain.availability = CaptainAvailability::OnRide;

        let ride = t.ride_mut(ride_id)?;
        ride.status = RideStatus::Accepted;
        ride.captain_id = Some(captain_id);
        ride.accepted_at = Some(now);
        ride.updated_at = now;
        Ok(ride.clone())
    }

    async fn reserve_otp_attempt(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        max_attempts: u32,
        now: DateTime<Utc>,
    ) -> Result<u32, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if ride.status != RideStatus::Accepted {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        if !ride.is_assigned_to(captain_id) {
            return Err(StoreError::NotAssigned);
        }
        let used = u32::try_from(ride.otp_attempts).unwrap_or(0);
        if used >= max_attempts {
            return Err(StoreError::OtpLocked);
        }
        ride.otp_attempts += 1;
        ride.updated_at = now;
        Ok(used + 1)
    }

    async fn mark_started(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if ride.status != RideStatus::Accepted {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        if !ride.is_assigned_to(captain_id) {
            return Err(StoreError::NotAssigned);
        }
        ride.status = RideStatus::Started;
        ride.started_at = Some(now);
        ride.updated_at = now;
        let ride = ride.clone();
        t.set_order_status(ride.order_id, OrderStatus::OutForDelivery, now);
        Ok(ride)
    }

    async fn settle_ride(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        settlement: &Settlement,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.rides.get(&ride_id).ok_or(StoreError::NotFound)?;
        if ride.status != RideStatus::Started {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        if !ride.is_assigned_to(captain_id) {
            return Err(StoreError::NotAssigned);
        }
        if t.ledger.iter().any(|e| e.ride_id == Some(ride_id)) {
            return Err(StoreError::Conflict(format!("ride {ride_id} already settled")));
        }
        let (order_id, shop_id) = (ride.order_id, ride.shop_id);
        let shop_id = match (order_id, shop_id) {
            (Some(_), Some(shop_id)) => {
                if !t.shops.contains_key(&shop_id) {
                    return Err(StoreError::NotFound);
                }
                Some(shop_id)
            }
            _ if settlement.shop_payout.is_zero() => None,
            _ => {
                return Err(StoreError::DataCorruption(format!(
                    "ride {ride_id} has a shop payout but no shop"
                )));
            }
        };

        let captain = t.captain_mut(captain_id)?;
        captain.availability = CaptainAvailability::Available;
        captain.rides_completed += 1;
        captain.lifetime_earnings = captain.lifetime_earnings + settlement.captain_earning;
        captain.earnings_balance = captain.earnings_balance + settlement.captain_earning;
        t.push_entry(
            LedgerAccount::Captain(captain_id),
            EntryKind::RideEarning,
            settlement.captain_earning,
            Some(ride_id),
            None,
            now,
        );

        if let Some(shop_id) = shop_id {
            if let Some(shop) = t.shops.get_mut(&shop_id) {
                shop.balance = shop.balance + settlement.shop_payout;
            }
            t.push_entry(
                LedgerAccount::Shop(shop_id),
                EntryKind::ShopSale,
                settlement.shop_payout,
                Some(ride_id),
                None,
                now,
            );
        }

        t.platform_balance = t.platform_balance + settlement.platform_commission;
        t.push_entry(
            LedgerAccount::Platform,
            EntryKind::PlatformCommission,
            settlement.platform_commission,
            Some(ride_id),
            None,
            now,
        );

        t.set_order_status(order_id, OrderStatus::Delivered, now);

        let ride = t.ride_mut(ride_id)?;
        ride.status = RideStatus::Completed;
        ride.completed_at = Some(now);
        ride.updated_at = now;
        Ok(ride.clone())
    }

    async fn withdraw_captain(
        &self,
        ride_id: RideId,
        captain_id: CaptainId,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if ride.status != RideStatus::Accepted {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        if !ride.is_assigned_to(captain_id) {
            return Err(StoreError::NotAssigned);
        }
        ride.status = RideStatus::Requested;
        ride.captain_id = None;
        ride.accepted_at = None;
        ride.updated_at = now;
        let ride = ride.clone();
        t.free_captain(Some(captain_id));

        let offered = t.offers.entry(ride_id).or_default();
        if !offered.contains(&captain_id) {
            offered.push(captain_id);
        }
        t.withdrawn.entry(ride_id).or_default().push(captain_id);
        Ok(ride)
    }

    async fn cancel_ride(
        &self,
        ride_id: RideId,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if !ride.status.is_cancellable() {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        ride.status = RideStatus::Cancelled;
        ride.cancelled_at = Some(now);
        ride.cancel_reason = Some(reason.to_owned());
        ride.updated_at = now;
        let ride = ride.clone();
        t.free_captain(ride.captain_id);
        t.set_order_status(ride.order_id, OrderStatus::Cancelled, now);
        Ok(ride)
    }

    async fn expire_ride(&self, ride_id: RideId, now: DateTime<Utc>) -> Result<Ride, StoreError> {
        let mut t = self.tables.lock().await;
        let ride = t.ride_mut(ride_id)?;
        if ride.status != RideStatus::Requested {
            return Err(StoreError::RideState {
                actual: ride.status,
            });
        }
        ride.status = RideStatus::Expired;
        ride.cancelled_at = Some(now);
        ride.cancel_reason = Some("no captain accepted".to_owned());
        ride.updated_at = now;
        let ride = ride.clone();
        t.set_order_status(ride.order_id, OrderStatus::Cancelled, now);
        Ok(ride)
    }

    async fn stale_requested_rides(&self, cutoff: DateTime<Utc>) -> Result<Vec<Ride>, StoreError> {
        let t = self.tables.lock().await;
        let mut stale: Vec<Ride> = t
            .rides
            .values()
            .filter(|r| r.status == RideStatus::Requested)
            .filter(|r| r.last_dispatched_at.unwrap_or(r.created_at) < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|r| r.last_dispatched_at.unwrap_or(r.created_at));
        Ok(stale)
    }

    async fn update_captain_location(
        &self,
        captain_id: CaptainId,
        location: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Captain, StoreError> {
        let mut t = self.tables.lock().await;
        let captain = t.captain_mut(captain_id)?;
        captain.location = Some(location);
        captain.location_updated_at = Some(now);
        Ok(captain.clone())
    }

    async fn set_captain_availability(
        &self,
        captain_id: CaptainId,
        availability: CaptainAvailability,
    ) -> Result<Captain, StoreError> {
        let mut t = self.tables.lock().await;
        let captain = t.captain_mut(captain_id)?;
        if captain.availability == CaptainAvailability::OnRide {
            return Err(StoreError::CaptainOnRide);
        }
        captain.availability = availability;
        Ok(captain.clone())
    }

    async fn ledger_entries(
        &self,
        account: LedgerAccount,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.ledger
            .iter()
            .rev()
            .filter(|e| e.account == account)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn ride_ledger(&self, ride_id: RideId) -> Result<Vec<LedgerEntry>, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.ledger
            .iter()
            .filter(|e| e.ride_id == Some(ride_id))
            .cloned()
            .collect())
    }

    async fn account_balance(&self, account: LedgerAccount) -> Result<Money, StoreError> {
        self.tables.lock().await.balance(account)
    }

    async fn ledger_total(&self, account: LedgerAccount) -> Result<Money, StoreError> {
        let t = self.tables.lock().await;
        Ok(t.ledger
            .iter()
            .filter(|e| e.account == account)
            .map(|e| e.amount)
            .sum())
    }

    async fn record_payout(
        &self,
        shop_id: ShopId,
        amount: Money,
        memo: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, StoreError> {
        let mut t = self.tables.lock().await;
        let shop = t.shops.get_mut(&shop_id).ok_or(StoreError::NotFound)?;
        if shop.balance < amount {
            return Err(StoreError::InsufficientBalance {
                balance: shop.balance,
            });
        }
        shop.balance = shop.balance - amount;
        Ok(t.push_entry(
            LedgerAccount::Shop(shop_id),
            EntryKind::Payout,
            -amount,
            None,
            memo.map(str::to_owned),
            now,
        ))
    }

    async fn record_notification(&self, record: &NotificationRecord) -> Result<(), StoreError> {
        self.tables.lock().await.notifications.push(record.clone());
        Ok(())
    }
}

fn new_ride(t: &mut Tables, new: &NewRide) -> Ride {
    Ride {
        id: RideId::new(t.next_id()),
        order_id: new.order_id,
        user_id: new.user_id,
        shop_id: new.shop_id,
        captain_id: None,
        status: RideStatus::Requested,
        pickup: new.pickup,
        dropoff: new.dropoff,
        distance_km: new.distance_km,
        fare: new.fare,
        otp: new.otp.clone(),
        otp_attempts: 0,
        dispatch_attempts: 0,
        last_dispatched_at: None,
        accepted_at: None,
        started_at: None,
        completed_at: None,
        cancelled_at: None,
        cancel_reason: None,
        created_at: new.created_at,
        updated_at: new.created_at,
    }
}
