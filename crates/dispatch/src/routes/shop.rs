//! Shop ledger endpoints.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use tiffin_core::Money;

use crate::error::Result;
use crate::middleware::RequireShop;
use crate::models::LedgerEntry;
use crate::services::dispatch::ShopBalance;
use crate::state::AppState;
use crate::store::DispatchStore;

/// Default page size for `GET /api/shop/ledger`.
const DEFAULT_LEDGER_LIMIT: usize = 50;

/// Query of `GET /api/shop/ledger`.
#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub limit: Option<usize>,
}

/// Body of `POST /api/shop/payouts`.
#[derive(Debug, Deserialize)]
pub struct PayoutRequest {
    pub amount: Money,
    #[serde(default)]
    pub memo: Option<String>,
}

/// Balance plus a recomputation from the ledger.
///
/// GET /api/shop/balance
///
/// # Errors
///
/// 404 if the shop record is gone.
pub async fn balance<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireShop(shop): RequireShop,
) -> Result<Json<ShopBalance>> {
    Ok(Json(state.dispatch().shop_balance(shop).await?))
}

/// GET /api/shop/ledger?limit=N
///
/// # Errors
///
/// Store failures only.
pub async fn ledger<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireShop(shop): RequireShop,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<Vec<LedgerEntry>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LEDGER_LIMIT);
    Ok(Json(state.dispatch().shop_ledger(shop, limit).await?))
}

/// POST /api/shop/payouts
///
/// # Errors
///
/// 409 when the amount exceeds the balance.
pub async fn payout<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireShop(shop): RequireShop,
    Json(body): Json<PayoutRequest>,
) -> Result<(StatusCode, Json<LedgerEntry>)> {
    let entry = state
        .dispatch()
        .request_payout(shop, body.amount, body.memo.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}
