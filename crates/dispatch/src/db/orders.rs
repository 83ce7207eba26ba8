//! Queries for orders.

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;

use tiffin_core::{Money, OrderId, OrderStatus, PaymentMethod, PaymentStatus, ShopId, UserId};

use super::point;
use crate::models::{NewOrder, Order, OrderItem};
use crate::store::StoreError;

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: OrderId,
    user_id: UserId,
    shop_id: ShopId,
    items: Json<Vec<OrderItem>>,
    dropoff_lat: f64,
    dropoff_lng: f64,
    address: String,
    subtotal: Money,
    delivery_fee: Money,
    total: Money,
    payment_method: PaymentMethod,
    payment_status: PaymentStatus,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(r: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            shop_id: r.shop_id,
            items: r.items.0,
            dropoff: point("order dropoff", r.dropoff_lat, r.dropoff_lng)?,
            address: r.address,
            subtotal: r.subtotal,
            delivery_fee: r.delivery_fee,
            total: r.total,
            payment_method: r.payment_method,
            payment_status: r.payment_status,
            status: r.status,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

const ORDER_COLUMNS: &str = "id, user_id, shop_id, items, dropoff_lat, dropoff_lng, address, \
     subtotal, delivery_fee, total, payment_method, payment_status, status, created_at, updated_at";

pub(super) async fn insert(
    conn: &mut PgConnection,
    new: &NewOrder,
    now: DateTime<Utc>,
) -> Result<Order, StoreError> {
    let row: OrderRow = sqlx::query_as(&format!(
        "INSERT INTO orders (user_id, shop_id, items, dropoff_lat, dropoff_lng, address, \
                             subtotal, delivery_fee, total, payment_method, payment_status, \
                             created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $12) \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(new.user_id)
    .bind(new.shop_id)
    .bind(Json(&new.items))
    .bind(new.dropoff.lat())
    .bind(new.dropoff.lng())
    .bind(&new.address)
    .bind(new.subtotal)
    .bind(new.delivery_fee)
    .bind(new.subtotal + new.delivery_fee)
    .bind(new.payment_method)
    .bind(new.payment_status)
    .bind(now)
    .fetch_one(conn)
    .await?;
    row.try_into()
}

pub(super) async fn get(conn: &mut PgConnection, id: OrderId) -> Result<Option<Order>, StoreError> {
    let row: Option<OrderRow> =
        sqlx::query_as(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id)
            .fetch_optional(conn)
            .await?;
    row.map(Order::try_from).transpose()
}

/// Move the order from `from` to `to`; `None` if it was not in `from`.
pub(super) async fn transition(
    conn: &mut PgConnection,
    id: OrderId,
    from: OrderStatus,
    to: OrderStatus,
    now: DateTime<Utc>,
) -> Result<Option<Order>, StoreError> {
    let row: Option<OrderRow> = sqlx::query_as(&format!(
        "UPDATE orders SET status = $3, updated_at = $4 WHERE id = $1 AND status = $2 \
         RETURNING {ORDER_COLUMNS}"
    ))
    .bind(id)
    .bind(from)
    .bind(to)
    .bind(now)
    .fetch_optional(conn)
    .await?;
    row.map(Order::try_from).transpose()
}

/// Follow the ride lifecycle; delivery also marks the order paid.
pub(super) async fn follow_ride(
    conn: &mut PgConnection,
    id: OrderId,
    status: OrderStatus,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    sqlx::query(
        "UPDATE orders SET status = $2, updated_at = $3, \
                payment_status = CASE WHEN $2 = 'delivered'::order_status \
                                      THEN 'paid'::payment_status ELSE payment_status END \
         WHERE id = $1",
    )
    .bind(id)
    .bind(status)
    .bind(now)
    .execute(conn)
    .await?;
    Ok(())
}
