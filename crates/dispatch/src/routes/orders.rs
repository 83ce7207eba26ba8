//! Order endpoints.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::Serialize;
use tiffin_core::OrderId;

use crate::error::Result;
use crate::middleware::{Authenticated, RequireShop, RequireUser};
use crate::models::{Order, RideView};
use crate::services::dispatch::PlaceOrder;
use crate::state::AppState;
use crate::store::DispatchStore;

/// A confirmed order and the ride created for it.
#[derive(Debug, Serialize)]
pub struct ConfirmedOrder {
    pub order: Order,
    pub ride: RideView,
}

/// Place an order.
///
/// POST /api/orders
///
/// # Errors
///
/// 400 for an invalid cart, 404 for an unknown shop.
pub async fn place<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireUser(user): RequireUser,
    Json(request): Json<PlaceOrder>,
) -> Result<(StatusCode, Json<Order>)> {
    let order = state.dispatch().place_order(user, request).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// Order details.
///
/// GET /api/orders/{id}
///
/// # Errors
///
/// 403 unless the caller is the order's user or shop.
pub async fn show<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.dispatch().order(principal, id).await?))
}

/// The shop accepts an order. The ride's OTP is not shown to the shop.
///
/// POST /api/orders/{id}/confirm
///
/// # Errors
///
/// 402 for unpaid prepaid orders, 409 once the order is past `pending`.
pub async fn confirm<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireShop(shop): RequireShop,
    Path(id): Path<OrderId>,
) -> Result<Json<ConfirmedOrder>> {
    let (order, ride) = state.dispatch().confirm_order(shop, id).await?;
    Ok(Json(ConfirmedOrder {
        order,
        ride: RideView::new(&ride, false),
    }))
}

/// Cancel an order that has not been confirmed.
///
/// POST /api/orders/{id}/cancel
///
/// # Errors
///
/// 409 once confirmed; cancel the ride instead.
pub async fn cancel<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>> {
    Ok(Json(state.dispatch().cancel_order(principal, id).await?))
}
