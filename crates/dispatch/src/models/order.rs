//! Shop orders.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiffin_core::{
    GeoPoint, Money, OrderId, OrderStatus, PaymentMethod, PaymentStatus, ShopId, UserId,
};

/// One cart line, priced at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    /// Product name as shown on the menu.
    pub name: String,
    /// Price of one unit.
    pub unit_price: Money,
    /// Number of units.
    pub quantity: u32,
}

impl OrderItem {
    /// `unit_price * quantity`, or `None` on overflow.
    #[must_use]
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul_qty(self.quantity)
    }
}

/// A purchase from one shop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    /// Unique order ID.
    pub id: OrderId,
    /// Who ordered.
    pub user_id: UserId,
    /// Who fulfills.
    pub shop_id: ShopId,
    /// Cart lines.
    pub items: Vec<OrderItem>,
    /// Delivery coordinates.
    pub dropoff: GeoPoint,
    /// Human-readable shipping address.
    pub address: String,
    /// Sum of line totals.
    pub subtotal: Money,
    /// Quoted delivery fare.
    pub delivery_fee: Money,
    /// `subtotal + delivery_fee`.
    pub total: Money,
    /// How the user pays.
    pub payment_method: PaymentMethod,
    /// Whether payment was collected.
    pub payment_status: PaymentStatus,
    /// Fulfillment status.
    pub status: OrderStatus,
    /// When the order was placed.
    pub created_at: DateTime<Utc>,
    /// When the order last changed.
    pub updated_at: DateTime<Utc>,
}

/// A validated order ready to be stored.
#[derive(Debug, Clone)]
pub struct NewOrder {
    /// Who ordered.
    pub user_id: UserId,
    /// Who fulfills.
    pub shop_id: ShopId,
    /// Cart lines.
    pub items: Vec<OrderItem>,
    /// Delivery coordinates.
    pub dropoff: GeoPoint,
    /// Human-readable shipping address.
    pub address: String,
    /// Sum of line totals.
    pub subtotal: Money,
    /// Quoted delivery fare.
    pub delivery_fee: Money,
    /// How the user pays.
    pub payment_method: PaymentMethod,
    /// Initial payment status.
    pub payment_status: PaymentStatus,
}
