#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use tiffin_core::{
    CaptainAvailability, CaptainId, GeoPoint, Money, OrderStatus, PaymentMethod, PaymentStatus,
    RideId, RideStatus, ShopId, UserId,
};

use super::*;
use crate::config::DispatchSettings;
use crate::models::{
    Captain, LedgerAccount, NewCaptain, NewShop, NewUser, Order, OrderItem, Shop, User,
};
use crate::notify::{Hub, OutboxWorker, RetryPolicy, Subscription};
use crate::store::MemoryStore;

type Service = DispatchService<MemoryStore, Hub>;

const SHOP: (f64, f64) = (12.9716, 77.5946);
const DROPOFF: (f64, f64) = (12.9352, 77.6245);

struct Fixture {
    service: Service,
    worker: OutboxWorker<MemoryStore, Hub>,
    store: Arc<MemoryStore>,
    hub: Arc<Hub>,
    user: User,
    shop: Shop,
    /// About 0.5 km, 2 km and 6 km north of the shop.
    captains: Vec<Captain>,
}

fn point((lat, lng): (f64, f64)) -> GeoPoint {
    GeoPoint::new(lat, lng).unwrap()
}

fn settings() -> DispatchSettings {
    DispatchSettings {
        auto_dispatch: false,
        retry: RetryPolicy {
            max_attempts: 2,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        },
        ..DispatchSettings::default()
    }
}

async fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(Hub::new(16));
    let (service, worker) = DispatchService::new(Arc::clone(&store), Arc::clone(&hub), settings(), 64);
    let now = Utc::now();

    let user = store
        .insert_user(
            &NewUser {
                name: "Asha".to_owned(),
                phone: "+91 98450 00001".to_owned(),
            },
            now,
        )
        .await
        .unwrap();
    let shop = store
        .insert_shop(
            &NewShop {
                name: "Udupi Corner".to_owned(),
                location: point(SHOP),
            },
            now,
        )
        .await
        .unwrap();

    let mut captains = Vec::new();
    for (i, lat) in [12.9761, 12.9896, 13.0256].into_iter().enumerate() {
        let captain = store
            .insert_captain(
                &NewCaptain {
                    name: format!("Captain {i}"),
                    vehicle: format!("scooter KA-01-{i:04}"),
                },
                now,
            )
            .await
            .unwrap();
        service
            .update_captain_location(captain.id, point((lat, SHOP.1)))
            .await
            .unwrap();
        let captain = service
            .set_captain_availability(captain.id, CaptainAvailability::Available)
            .await
            .unwrap();
        captains.push(captain);
    }

    Fixture {
        service,
        worker,
        store,
        hub,
        user,
        shop,
        captains,
    }
}

impl Fixture {
    fn captain(&self, i: usize) -> CaptainId {
        self.captains[i].id
    }

    async fn subscribe_captain(&self, i: usize) -> Subscription {
        self.hub.subscribe(Principal::captain(self.captain(i))).await
    }

    async fn place_order(&self, payment_method: PaymentMethod, reference: Option<&str>) -> Order {
        self.service
            .place_order(
                self.user.id,
                PlaceOrder {
                    shop_id: self.shop.id,
                    items: vec![OrderItem {
                        name: "Masala dosa".to_owned(),
                        unit_price: Money::from_cents(12_000),
                        quantity: 2,
                    }],
                    dropoff: point(DROPOFF),
                    address: "4th Cross, Koramangala".to_owned(),
                    payment_method,
                    payment_reference: reference.map(str::to_owned),
                },
            )
            .await
            .unwrap()
    }

    /// A confirmed order whose ride has been offered to the two nearest captains.
    async fn dispatched_ride(&self) -> (Order, Ride) {
        let order = self.place_order(PaymentMethod::CashOnDelivery, None).await;
        let (_, ride) = self.service.confirm_order(self.shop.id, order.id).await.unwrap();
        let outcome = self.service.dispatch_ride(ride.id).await.unwrap();
        assert_eq!(outcome.candidates, vec![self.captain(0), self.captain(1)]);
        (order, ride)
    }

    async fn ride(&self, id: RideId) -> Ride {
        self.store.ride(id).await.unwrap().unwrap()
    }
}

fn drain_events(sub: &mut Subscription) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = sub.rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_order_to_settlement() {
    let mut fx = fixture().await;
    let mut offers = fx.subscribe_captain(0).await;
    let mut user_events = fx.hub.subscribe(Principal::user(fx.user.id)).await;

    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    assert_eq!(order.subtotal, Money::from_cents(24_000));
    assert_eq!(order.delivery_fee, Money::from_cents(9_092));
    assert_eq!(order.total, Money::from_cents(33_092));

    let (order, ride) = fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Confirmed);
    assert_eq!(ride.status, RideStatus::Requested);
    assert_eq!(ride.fare, order.delivery_fee);

    let outcome = fx.service.dispatch_ride(ride.id).await.unwrap();
    assert_eq!(outcome.round, 1);
    assert_eq!(outcome.candidates, vec![fx.captain(0), fx.captain(1)]);
    assert_eq!((outcome.delivered, outcome.failed), (1, 1));
    assert!(matches!(
        drain_events(&mut offers).as_slice(),
        [Event::RideOffered { ride_id, .. }] if *ride_id == ride.id
    ));

    let accepted = fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    assert_eq!(accepted.status, RideStatus::Accepted);

    let wrong = if ride.otp.as_str() == "000000" { "111111" } else { "000000" };
    assert!(matches!(
        fx.service.start_ride(fx.captain(0), ride.id, wrong).await,
        Err(DispatchError::InvalidOtp { remaining: 4 })
    ));
    let started = fx
        .service
        .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
        .await
        .unwrap();
    assert_eq!(started.status, RideStatus::Started);

    let receipt = fx.service.complete_ride(fx.captain(0), ride.id).await.unwrap();
    assert_eq!(receipt.ride.status, RideStatus::Completed);
    assert_eq!(receipt.settlement.total(), order.total);
    assert_eq!(receipt.settlement.shop_payout, Money::from_cents(21_600));
    assert_eq!(receipt.settlement.captain_earning, Money::from_cents(7_274));

    let order = fx.service.order(Principal::user(fx.user.id), order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);
    assert_eq!(order.payment_status, PaymentStatus::Paid);

    let earnings = fx.service.captain_earnings(fx.captain(0)).await.unwrap();
    assert_eq!(earnings.balance, Money::from_cents(7_274));
    assert_eq!(earnings.rides_completed, 1);
    assert_eq!(earnings.recent_entries.len(), 1);

    let balance = fx.service.shop_balance(fx.shop.id).await.unwrap();
    assert_eq!(balance.balance, Money::from_cents(21_600));
    assert!(balance.audit.consistent);
    let platform = fx.service.audit_account(LedgerAccount::Platform).await.unwrap();
    assert_eq!(platform.stored, receipt.settlement.platform_commission);
    assert!(platform.consistent);

    fx.worker.drain().await;
    let names: Vec<&str> = drain_events(&mut user_events).iter().map(Event::name).collect();
    assert_eq!(names, ["ride_accepted", "ride_started", "ride_completed"]);
}

#[tokio::test]
async fn test_complete_twice_never_recredits() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    fx.service
        .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
        .await
        .unwrap();
    fx.service.complete_ride(fx.captain(0), ride.id).await.unwrap();

    assert!(matches!(
        fx.service.complete_ride(fx.captain(0), ride.id).await,
        Err(DispatchError::InvalidRideState {
            actual: RideStatus::Completed
        })
    ));
    assert_eq!(fx.store.ride_ledger(ride.id).await.unwrap().len(), 3);
    let captain = fx.store.captain(fx.captain(0)).await.unwrap().unwrap();
    assert_eq!(captain.rides_completed, 1);
    assert_eq!(captain.availability, CaptainAvailability::Available);
}

#[tokio::test]
async fn test_concurrent_accepts_only_one_wins() {
    let mut fx = fixture().await;
    let mut first = fx.subscribe_captain(0).await;
    let mut second = fx.subscribe_captain(1).await;
    let (_, ride) = fx.dispatched_ride().await;

    let (a, b) = tokio::join!(
        fx.service.accept_ride(fx.captain(0), ride.id),
        fx.service.accept_ride(fx.captain(1), ride.id),
    );
    let (winner, loser_sub) = match (a, b) {
        (Ok(_), Err(DispatchError::RideAlreadyTaken)) => (fx.captain(0), &mut second),
        (Err(DispatchError::RideAlreadyTaken), Ok(_)) => (fx.captain(1), &mut first),
        other => panic!("expected exactly one winner, got {other:?}"),
    };

    let ride = fx.ride(ride.id).await;
    assert_eq!(ride.captain_id, Some(winner));

    fx.worker.drain().await;
    assert!(
        drain_events(loser_sub)
            .iter()
            .any(|e| matches!(e, Event::RideTaken { .. }))
    );
}

#[tokio::test]
async fn test_accept_requires_offer() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    assert!(matches!(
        fx.service.accept_ride(fx.captain(2), ride.id).await,
        Err(DispatchError::NotOffered)
    ));
}

#[tokio::test]
async fn test_search_expands_radius() {
    let fx = fixture().await;
    for i in 0..2 {
        fx.service
            .set_captain_availability(fx.captain(i), CaptainAvailability::Offline)
            .await
            .unwrap();
    }
    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    let (_, ride) = fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();

    let outcome = fx.service.dispatch_ride(ride.id).await.unwrap();
    assert_eq!(outcome.candidates, vec![fx.captain(2)]);
}

#[tokio::test]
async fn test_otp_lockout() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    let wrong = if ride.otp.as_str() == "999999" { "123456" } else { "999999" };

    for remaining in (0..5).rev() {
        match fx.service.start_ride(fx.captain(0), ride.id, wrong).await {
            Err(DispatchError::InvalidOtp { remaining: r }) => assert_eq!(r, remaining),
            other => panic!("expected InvalidOtp, got {other:?}"),
        }
    }
    assert!(matches!(
        fx.service
            .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
            .await,
        Err(DispatchError::OtpLocked)
    ));
    assert_eq!(fx.ride(ride.id).await.status, RideStatus::Accepted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_otp_guesses_share_one_budget() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    let wrong = if ride.otp.as_str() == "999999" { "123456" } else { "999999" };

    let (ride_id, captain) = (ride.id, fx.captain(0));
    let guesses: Vec<_> = (0..40)
        .map(|_| {
            let service = fx.service.clone();
            tokio::spawn(async move { service.start_ride(captain, ride_id, wrong).await })
        })
        .collect();

    let mut evaluated = 0;
    let mut locked = 0;
    for guess in guesses {
        match guess.await.unwrap() {
            Err(DispatchError::InvalidOtp { .. }) => evaluated += 1,
            Err(DispatchError::OtpLocked) => locked += 1,
            other => panic!("unexpected result {other:?}"),
        }
    }
    assert_eq!(evaluated, 5);
    assert_eq!(locked, 35);
    assert_eq!(fx.ride(ride.id).await.otp_attempts, 5);
}

#[tokio::test]
async fn test_only_assigned_captain_may_start() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    assert!(matches!(
        fx.service
            .start_ride(fx.captain(1), ride.id, ride.otp.as_str())
            .await,
        Err(DispatchError::Forbidden)
    ));
}

#[tokio::test]
async fn test_withdraw_reopens_and_skips_previous_offers() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();

    let outcome = fx
        .service
        .cancel_ride(Principal::captain(fx.captain(0)), ride.id, Some("flat tyre"))
        .await
        .unwrap();
    assert!(matches!(outcome, CancelOutcome::Reopened(ref r) if r.status == RideStatus::Requested));
    let captain = fx.store.captain(fx.captain(0)).await.unwrap().unwrap();
    assert_eq!(captain.availability, CaptainAvailability::Available);

    let outcome = fx.service.dispatch_ride(ride.id).await.unwrap();
    assert_eq!(outcome.round, 2);
    assert_eq!(outcome.candidates, vec![fx.captain(2)]);
}

#[tokio::test]
async fn test_withdrawn_captain_cannot_take_ride_back() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    fx.service
        .cancel_ride(Principal::captain(fx.captain(0)), ride.id, Some("flat tyre"))
        .await
        .unwrap();

    let again = fx.service.accept_ride(fx.captain(0), ride.id).await;
    assert!(matches!(again, Err(DispatchError::NotOffered)));
    assert!(matches!(
        fx.service
            .ride_view(Principal::captain(fx.captain(0)), ride.id)
            .await,
        Err(DispatchError::Forbidden)
    ));
    assert_eq!(fx.ride(ride.id).await.status, RideStatus::Requested);

    // The other offeree can still claim it.
    let taken = fx.service.accept_ride(fx.captain(1), ride.id).await.unwrap();
    assert_eq!(taken.captain_id, Some(fx.captain(1)));
}

#[tokio::test]
async fn test_user_cancel_frees_captain_and_order() {
    let mut fx = fixture().await;
    let mut captain_events = fx.subscribe_captain(0).await;
    let (order, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();

    let outcome = fx
        .service
        .cancel_ride(Principal::user(fx.user.id), ride.id, None)
        .await
        .unwrap();
    assert_eq!(outcome.ride().status, RideStatus::Cancelled);
    assert_eq!(outcome.ride().cancel_reason.as_deref(), Some("cancelled by user"));

    let order = fx.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    let captain = fx.store.captain(fx.captain(0)).await.unwrap().unwrap();
    assert_eq!(captain.availability, CaptainAvailability::Available);

    fx.worker.drain().await;
    assert!(
        drain_events(&mut captain_events)
            .iter()
            .any(|e| matches!(e, Event::RideCancelled { .. }))
    );
}

#[tokio::test]
async fn test_started_ride_cannot_be_cancelled() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    fx.service
        .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
        .await
        .unwrap();

    for principal in [
        Principal::user(fx.user.id),
        Principal::shop(fx.shop.id),
        Principal::captain(fx.captain(0)),
    ] {
        assert!(matches!(
            fx.service.cancel_ride(principal, ride.id, None).await,
            Err(DispatchError::InvalidRideState {
                actual: RideStatus::Started
            })
        ));
    }
}

#[tokio::test]
async fn test_outsiders_are_forbidden() {
    let fx = fixture().await;
    let (order, ride) = fx.dispatched_ride().await;
    let stranger = Principal::user(UserId::new(9_999));

    assert!(matches!(
        fx.service.cancel_ride(stranger, ride.id, None).await,
        Err(DispatchError::Forbidden)
    ));
    assert!(matches!(
        fx.service.ride_view(stranger, ride.id).await,
        Err(DispatchError::Forbidden)
    ));
    assert!(matches!(
        fx.service.order(stranger, order.id).await,
        Err(DispatchError::Forbidden)
    ));
    assert!(matches!(
        fx.service
            .ride_view(Principal::captain(fx.captain(2)), ride.id)
            .await,
        Err(DispatchError::Forbidden)
    ));
}

#[tokio::test]
async fn test_otp_only_visible_to_user() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;

    let view = fx.service.ride_view(Principal::user(fx.user.id), ride.id).await.unwrap();
    assert_eq!(view.otp.as_deref(), Some(ride.otp.as_str()));

    for principal in [Principal::shop(fx.shop.id), Principal::captain(fx.captain(0))] {
        let view = fx.service.ride_view(principal, ride.id).await.unwrap();
        assert!(view.otp.is_none());
    }
}

#[tokio::test]
async fn test_sweeper_redispatches_then_expires() {
    let fx = fixture().await;
    for i in 0..3 {
        fx.service
            .set_captain_availability(fx.captain(i), CaptainAvailability::Offline)
            .await
            .unwrap();
    }
    let t0 = Utc::now();
    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    let (_, ride) = fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();
    let outcome = fx.service.dispatch_ride(ride.id).await.unwrap();
    assert!(outcome.candidates.is_empty());

    let at = |secs: i64| t0 + TimeDelta::seconds(secs);
    assert_eq!(fx.service.sweep_stale_rides(at(10)).await.unwrap(), SweepReport::default());

    for (secs, round) in [(46, 2), (92, 3)] {
        let report = fx.service.sweep_stale_rides(at(secs)).await.unwrap();
        assert_eq!(report.redispatched, 1);
        assert_eq!(fx.ride(ride.id).await.dispatch_attempts, round);
    }

    let report = fx.service.sweep_stale_rides(at(138)).await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(fx.ride(ride.id).await.status, RideStatus::Expired);
    let order = fx.store.order(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn test_prepaid_orders_need_payment() {
    let fx = fixture().await;

    let unpaid = fx.place_order(PaymentMethod::Prepaid, None).await;
    assert_eq!(unpaid.payment_status, PaymentStatus::Pending);
    assert!(matches!(
        fx.service.confirm_order(fx.shop.id, unpaid.id).await,
        Err(DispatchError::PaymentRequired)
    ));

    let paid = fx.place_order(PaymentMethod::Prepaid, Some("pay_8K2Q")).await;
    assert_eq!(paid.payment_status, PaymentStatus::Paid);
    assert!(fx.service.confirm_order(fx.shop.id, paid.id).await.is_ok());
}

#[tokio::test]
async fn test_confirm_is_idempotent() {
    let fx = fixture().await;
    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    let (_, first) = fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();
    let (_, second) = fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();
    assert_eq!(first.id, second.id);

    assert!(matches!(
        fx.service.confirm_order(ShopId::new(9_999), order.id).await,
        Err(DispatchError::Forbidden)
    ));
}

#[tokio::test]
async fn test_oversized_order_is_rejected() {
    let fx = fixture().await;
    let huge = Money::new(rust_decimal::Decimal::from_i128_with_scale(10_i128.pow(27), 0));
    let result = fx
        .service
        .place_order(
            fx.user.id,
            PlaceOrder {
                shop_id: fx.shop.id,
                items: vec![OrderItem {
                    name: "Gold thali".to_owned(),
                    unit_price: huge,
                    quantity: 1,
                }],
                dropoff: point(DROPOFF),
                address: "4th Cross, Koramangala".to_owned(),
                payment_method: PaymentMethod::CashOnDelivery,
                payment_reference: None,
            },
        )
        .await;
    assert!(matches!(result, Err(DispatchError::Validation(_))));

    // The subtotal fits on its own but not with the delivery fee added.
    let result = fx
        .service
        .place_order(
            fx.user.id,
            PlaceOrder {
                shop_id: fx.shop.id,
                items: vec![OrderItem {
                    name: "Banquet".to_owned(),
                    unit_price: Money::MAX_STORED,
                    quantity: 1,
                }],
                dropoff: point(DROPOFF),
                address: "4th Cross, Koramangala".to_owned(),
                payment_method: PaymentMethod::CashOnDelivery,
                payment_reference: None,
            },
        )
        .await;
    assert!(matches!(result, Err(DispatchError::Validation(_))));
}

#[tokio::test]
async fn test_cancel_pending_order_only() {
    let fx = fixture().await;
    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    let cancelled = fx
        .service
        .cancel_order(Principal::shop(fx.shop.id), order.id)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let order = fx.place_order(PaymentMethod::CashOnDelivery, None).await;
    fx.service.confirm_order(fx.shop.id, order.id).await.unwrap();
    assert!(matches!(
        fx.service
            .cancel_order(Principal::user(fx.user.id), order.id)
            .await,
        Err(DispatchError::InvalidOrderState {
            actual: OrderStatus::Confirmed
        })
    ));
}

#[tokio::test]
async fn test_payouts_debit_balance() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    fx.service
        .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
        .await
        .unwrap();
    fx.service.complete_ride(fx.captain(0), ride.id).await.unwrap();

    let entry = fx
        .service
        .request_payout(fx.shop.id, Money::from_cents(10_000), Some("NEFT 0042"))
        .await
        .unwrap();
    assert_eq!(entry.amount, Money::from_cents(-10_000));

    let balance = fx.service.shop_balance(fx.shop.id).await.unwrap();
    assert_eq!(balance.balance, Money::from_cents(11_600));
    assert!(balance.audit.consistent);

    assert!(matches!(
        fx.service
            .request_payout(fx.shop.id, Money::from_cents(50_000), None)
            .await,
        Err(DispatchError::InsufficientBalance { .. })
    ));
    assert!(matches!(
        fx.service.request_payout(fx.shop.id, Money::ZERO, None).await,
        Err(DispatchError::Validation(_))
    ));

    let ledger = fx.service.shop_ledger(fx.shop.id, 10).await.unwrap();
    assert_eq!(ledger.len(), 2);
    assert_eq!(ledger[0].id, entry.id);
}

#[tokio::test]
async fn test_orderless_ride_pays_no_shop() {
    let fx = fixture().await;
    let ride = fx
        .service
        .request_ride(fx.user.id, point(SHOP), point(DROPOFF))
        .await
        .unwrap();
    assert_eq!(ride.fare, Money::from_cents(9_092));
    assert!(ride.order_id.is_none());

    fx.service.dispatch_ride(ride.id).await.unwrap();
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();
    fx.service
        .start_ride(fx.captain(0), ride.id, ride.otp.as_str())
        .await
        .unwrap();
    let receipt = fx.service.complete_ride(fx.captain(0), ride.id).await.unwrap();

    assert!(receipt.settlement.shop_payout.is_zero());
    assert_eq!(receipt.settlement.captain_earning, Money::from_cents(7_274));
    assert_eq!(receipt.settlement.total(), ride.fare);
}

#[tokio::test]
async fn test_failed_offers_are_logged() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;

    let records = fx.store.notifications().await;
    assert_eq!(records.len(), 2);
    for record in records {
        assert_eq!(record.ride_id, Some(ride.id));
        assert_eq!(record.event, "ride_offered");
        assert!(!record.delivered);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.last_error.as_deref(), Some("recipient not connected"));
    }
}

#[tokio::test]
async fn test_captain_cannot_go_offline_mid_ride() {
    let fx = fixture().await;
    let (_, ride) = fx.dispatched_ride().await;
    fx.service.accept_ride(fx.captain(0), ride.id).await.unwrap();

    assert!(matches!(
        fx.service
            .set_captain_availability(fx.captain(0), CaptainAvailability::Offline)
            .await,
        Err(DispatchError::CaptainOnRide)
    ));
    assert!(matches!(
        fx.service
            .set_captain_availability(fx.captain(1), CaptainAvailability::OnRide)
            .await,
        Err(DispatchError::Validation(_))
    ));
}
