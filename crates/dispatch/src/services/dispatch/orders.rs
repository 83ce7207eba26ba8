//! Order placement, confirmation and order-less ride requests.

use chrono::Utc;
use tiffin_core::{
    GeoPoint, Money, OrderId, OrderStatus, Otp, PaymentMethod, PaymentStatus, ShopId, UserId,
};
use tracing::{info, instrument};

use super::{DispatchError, DispatchService, PlaceOrder};
use crate::models::{NewOrder, NewRide, Order, Principal, Ride, Role};
use crate::notify::Notifier;
use crate::store::{DispatchStore, StoreError};

/// Most units of one item per order line.
const MAX_QUANTITY: u32 = 50;

/// Most lines per order.
const MAX_ITEMS: usize = 100;

/// Longest accepted shipping address.
const MAX_ADDRESS_LEN: usize = 500;

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// Validate and store a new `pending` order, quoting its delivery fee.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty or malformed cart, `NotFound` if the user or
    /// shop does not exist.
    #[instrument(skip(self, request), fields(user_id = %user, shop_id = %request.shop_id))]
    pub async fn place_order(
        &self,
        user: UserId,
        request: PlaceOrder,
    ) -> Result<Order, DispatchError> {
        let subtotal = validate_cart(&request)?;

        self.store
            .user(user)
            .await?
            .ok_or(DispatchError::NotFound("user"))?;
        let shop = self
            .store
            .shop(request.shop_id)
            .await?
            .ok_or(DispatchError::NotFound("shop"))?;

        let quote = self.settings.fare.quote(&shop.location, &request.dropoff)?;
        subtotal
            .checked_add(quote.fare)
            .filter(Money::is_storable)
            .ok_or_else(too_large)?;

        let paid = request.payment_method == PaymentMethod::Prepaid
            && request
                .payment_reference
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());

        let new = NewOrder {
            user_id: user,
            shop_id: shop.id,
            items: request.items,
            dropoff: request.dropoff,
            address: request.address.trim().to_owned(),
            subtotal,
            delivery_fee: quote.fare,
            payment_method: request.payment_method,
            payment_status: if paid {
                PaymentStatus::Paid
            } else {
                PaymentStatus::Pending
            },
        };
        let order = self.store.insert_order(&new, Utc::now()).await?;

        info!(order_id = %order.id, total = %order.total, "Order placed");
        Ok(order)
    }

    /// An order, as seen by its user or its shop.
    ///
    /// # Errors
    ///
    /// `NotFound` if missing, `Forbidden` for anyone else.
    pub async fn order(&self, principal: Principal, order_id: OrderId) -> Result<Order, DispatchError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        if !is_order_party(principal, &order) {
            return Err(DispatchError::Forbidden);
        }
        Ok(order)
    }

    /// Shop accepts an order: create its ride and start dispatch.
    ///
    /// Idempotent: confirming an order that already has a ride returns that
    /// ride without creating another or dispatching again.
    ///
    /// # Errors
    ///
    /// `Forbidden` if the order belongs to another shop, `PaymentRequired`
    /// for unpaid prepaid orders, `InvalidOrderState` if the order is no
    /// longer pending.
    #[instrument(skip(self), fields(shop_id = %shop, order_id = %order_id))]
    pub async fn confirm_order(
        &self,
        shop: ShopId,
        order_id: OrderId,
    ) -> Result<(Order, Ride), DispatchError> {
        let order = self
            .store
            .order(order_id)
            .await?
            .ok_or(DispatchError::NotFound("order"))?;
        if order.shop_id != shop {
            return Err(DispatchError::Forbidden);
        }
        if let Some(ride) = self.store.ride_for_order(order_id).await? {
            return Ok((order, ride));
        }
        if order.status != OrderStatus::Pending {
            return Err(DispatchError::InvalidOrderState {
                actual: order.status,
            });
        }
        if order.payment_method == PaymentMethod::Prepaid
            && order.payment_status != PaymentStatus::Paid
        {
            return Err(DispatchError::PaymentRequired);
        }

        let shop = self
            .store
            .shop(shop)
            .await?
            .ok_or(DispatchError::NotFound("shop"))?;
        let quote = self.settings.fare.quote(&shop.location, &order.dropoff)?;
        let new = NewRide {
            order_id: Some(order.id),
            user_id: order.user_id,
            shop_id: Some(shop.id),
            pickup: shop.location,
            dropoff: order.dropoff,
            distance_km: quote.distance_km,
            fare: order.delivery_fee,
            otp: Otp::generate(),
            created_at: Utc::now(),
        };

        let (order, ride) = match self.store.confirm_order(order_id, &new).await {
            Ok(confirmed) => confirmed,
            // A concurrent confirm won; hand back its ride.
            Err(StoreError::Conflict(_) | StoreError::OrderState { .. }) => {
                let ride = self
                    .store
                    .ride_for_order(order_id)
                    .await?
                    .ok_or(DispatchError::InvalidOrderState {
                        actual: OrderStatus::Cancelled,
                    })?;
                let order = self
                    .store
                    .order(order_id)
                    .await?
                    .ok_or(DispatchError::NotFound("order"))?;
                return Ok((order, ride));
            }
            Err(e) => return Err(e.into()),
        };

        info!(ride_id = %ride.id, fare = %ride.fare, "Order confirmed, ride created");
        self.spawn_dispatch(ride.id);
        Ok((order, ride))
    }

    /// Cancel an order the shop has not confirmed yet.
    ///
    /// Confirmed orders are cancelled through their ride.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-parties, `InvalidOrderState` once confirmed.
    #[instrument(skip(self), fields(principal = %principal, order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        principal: Principal,
        order_id: OrderId,
    ) -> Result<Order, DispatchError> {
        let order = self.order(principal, order_id).await?;
        if order.status != OrderStatus::Pending {
            return Err(DispatchError::InvalidOrderState {
                actual: order.status,
            });
        }
        let order = self.store.cancel_pending_order(order_id, Utc::now()).await?;
        info!("Order cancelled");
        Ok(order)
    }

    /// A user books a courier ride that is not tied to a shop order.
    ///
    /// # Errors
    ///
    /// `NotFound` if the user does not exist.
    #[instrument(skip(self), fields(user_id = %user))]
    pub async fn request_ride(
        &self,
        user: UserId,
        pickup: GeoPoint,
        dropoff: GeoPoint,
    ) -> Result<Ride, DispatchError> {
        self.store
            .user(user)
            .await?
            .ok_or(DispatchError::NotFound("user"))?;

        let quote = self.settings.fare.quote(&pickup, &dropoff)?;
        let new = NewRide {
            order_id: None,
            user_id: user,
            shop_id: None,
            pickup,
            dropoff,
            distance_km: quote.distance_km,
            fare: quote.fare,
            otp: Otp::generate(),
            created_at: Utc::now(),
        };
        let ride = self.store.insert_ride(&new).await?;

        info!(ride_id = %ride.id, fare = %ride.fare, "Ride requested");
        self.spawn_dispatch(ride.id);
        Ok(ride)
    }
}

fn is_order_party(principal: Principal, order: &Order) -> bool {
    match principal.role {
        Role::User => principal.as_user() == Some(order.user_id),
        Role::Shop => principal.as_shop() == Some(order.shop_id),
        Role::Captain => false,
    }
}

/// Check the cart and return its subtotal.
fn validate_cart(request: &PlaceOrder) -> Result<Money, DispatchError> {
    if request.items.is_empty() {
        return Err(DispatchError::Validation(
            "order must contain at least one item".to_owned(),
        ));
    }
    if request.items.len() > MAX_ITEMS {
        return Err(DispatchError::Validation(format!(
            "order may contain at most {MAX_ITEMS} items"
        )));
    }
    let address = request.address.trim();
    if address.is_empty() || address.len() > MAX_ADDRESS_LEN {
        return Err(DispatchError::Validation(format!(
            "address must be 1-{MAX_ADDRESS_LEN} characters"
        )));
    }

    let mut subtotal = Money::ZERO;
    for item in &request.items {
        if item.name.trim().is_empty() {
            return Err(DispatchError::Validation("item name is required".to_owned()));
        }
        if !(1..=MAX_QUANTITY).contains(&item.quantity) {
            return Err(DispatchError::Validation(format!(
                "quantity of {} must be between 1 and {MAX_QUANTITY}",
                item.name
            )));
        }
        if item.unit_price.is_negative() {
            return Err(DispatchError::Validation(format!(
                "price of {} must not be negative",
                item.name
            )));
        }
        if !item.unit_price.is_storable() {
            return Err(DispatchError::Validation(format!(
                "price of {} must be at most {}",
                item.name,
                Money::MAX_STORED
            )));
        }
        subtotal = item
            .line_total()
            .and_then(|line| subtotal.checked_add(line))
            .filter(Money::is_storable)
            .ok_or_else(too_large)?;
    }
    Ok(subtotal.round_cents())
}

fn too_large() -> DispatchError {
    DispatchError::Validation(format!("order total must be at most {}", Money::MAX_STORED))
}
