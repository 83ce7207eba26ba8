//! HTTP and WebSocket routes for the dispatch service.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                       - Liveness check
//! GET  /health/ready                 - Readiness check (store reachable)
//! GET  /ws                           - Realtime events (token in ?token=)
//!
//! # Orders
//! POST /api/orders                   - Place an order (user)
//! GET  /api/orders/{id}              - Order details (user or shop)
//! POST /api/orders/{id}/confirm      - Accept an order, create its ride (shop)
//! POST /api/orders/{id}/cancel       - Cancel a pending order (user or shop)
//!
//! # Rides
//! POST /api/rides                    - Book an order-less ride (user)
//! GET  /api/rides/{id}               - Ride details (participants)
//! POST /api/rides/{id}/accept        - Take an offered ride (captain)
//! POST /api/rides/{id}/start         - Verify OTP and pick up (captain)
//! POST /api/rides/{id}/complete      - Deliver and settle (captain)
//! POST /api/rides/{id}/cancel        - Cancel, or withdraw as captain
//! POST /api/rides/{id}/dispatch      - Run another dispatch round (shop)
//!
//! # Captain
//! PUT  /api/captain/location         - Report position
//! PUT  /api/captain/availability     - Go online or offline
//! GET  /api/captain/earnings         - Balance and recent entries
//!
//! # Shop
//! GET  /api/shop/balance             - Balance with ledger audit
//! GET  /api/shop/ledger              - Ledger entries, newest first
//! POST /api/shop/payouts             - Withdraw from the balance
//! ```

pub mod captain;
pub mod health;
pub mod orders;
pub mod rides;
pub mod shop;
pub mod ws;

use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use tower_http::trace::{DefaultOnResponse, OnResponse, TraceLayer};
use tracing::Span;

use crate::middleware::{RateLimiterLayer, request_id_middleware};
use crate::state::AppState;
use crate::store::DispatchStore;

/// Order routes.
fn order_routes<S: DispatchStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/", post(orders::place::<S>))
        .route("/{id}", get(orders::show::<S>))
        .route("/{id}/confirm", post(orders::confirm::<S>))
        .route("/{id}/cancel", post(orders::cancel::<S>))
}

/// Ride routes.
fn ride_routes<S: DispatchStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/", post(rides::request::<S>))
        .route("/{id}", get(rides::show::<S>))
        .route("/{id}/accept", post(rides::accept::<S>))
        .route("/{id}/start", post(rides::start::<S>))
        .route("/{id}/complete", post(rides::complete::<S>))
        .route("/{id}/cancel", post(rides::cancel::<S>))
        .route("/{id}/dispatch", post(rides::redispatch::<S>))
}

/// Captain self-service routes.
fn captain_routes<S: DispatchStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/location", put(captain::update_location::<S>))
        .route("/availability", put(captain::set_availability::<S>))
        .route("/earnings", get(captain::earnings::<S>))
}

/// Shop ledger routes.
fn shop_routes<S: DispatchStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/balance", get(shop::balance::<S>))
        .route("/ledger", get(shop::ledger::<S>))
        .route("/payouts", post(shop::payout::<S>))
}

/// All JSON API routes, mounted under `/api`.
pub fn api_routes<S: DispatchStore>() -> Router<AppState<S>> {
    Router::new()
        .nest("/orders", order_routes())
        .nest("/rides", ride_routes())
        .nest("/captain", captain_routes())
        .nest("/shop", shop_routes())
}

/// Build the complete application router.
///
/// `api_limiter` guards `/api` only; health checks and the socket are never
/// rate limited.
pub fn router<S: DispatchStore>(
    state: AppState<S>,
    api_limiter: Option<RateLimiterLayer>,
) -> Router {
    let api = match api_limiter {
        Some(limiter) => api_routes().layer(limiter),
        None => api_routes(),
    };

    Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness::<S>))
        .route("/ws", get(ws::socket::<S>))
        .nest("/api", api)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = tracing::field::Empty,
                        principal = tracing::field::Empty,
                        status = tracing::field::Empty,
                        latency_ms = tracing::field::Empty,
                    )
                })
                .on_response(
                    |response: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &Span| {
                        span.record("status", response.status().as_u16());
                        span.record(
                            "latency_ms",
                            u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
                        );
                        DefaultOnResponse::default().on_response(response, latency, span);
                    },
                ),
        )
        .with_state(state)
        // Sentry layers (outermost for full request coverage)
        .layer(sentry_tower::NewSentryLayer::new_from_top())
        .layer(sentry_tower::SentryHttpLayer::new().enable_transaction())
}
