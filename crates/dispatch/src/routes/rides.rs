//! Ride lifecycle endpoints.
//!
//! Every handler returns a [`RideView`]; only the ride's user ever sees the
//! OTP.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use tiffin_core::{GeoPoint, RideId, Settlement};

use crate::error::Result;
use crate::middleware::{Authenticated, RequireCaptain, RequireUser};
use crate::models::{Ride, RideView};
use crate::services::dispatch::{CancelOutcome, DispatchOutcome};
use crate::state::AppState;
use crate::store::DispatchStore;

/// Body of `POST /api/rides`.
#[derive(Debug, Deserialize)]
pub struct RideRequest {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

/// Body of `POST /api/rides/{id}/start`.
#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub otp: String,
}

/// Body of `POST /api/rides/{id}/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Response of `POST /api/rides/{id}/complete`.
#[derive(Debug, Serialize)]
pub struct CompletedRide {
    pub ride: RideView,
    pub settlement: Settlement,
}

/// Response of `POST /api/rides/{id}/cancel`.
#[derive(Debug, Serialize)]
pub struct CancelledRide {
    /// `cancelled`, or `reopened` when the captain withdrew.
    pub outcome: &'static str,
    pub ride: RideView,
}

fn captain_view(ride: &Ride) -> Json<RideView> {
    Json(RideView::new(ride, false))
}

/// Book a ride without an order.
///
/// POST /api/rides
///
/// # Errors
///
/// 404 if the user no longer exists.
pub async fn request<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireUser(user): RequireUser,
    Json(body): Json<RideRequest>,
) -> Result<(StatusCode, Json<RideView>)> {
    let ride = state
        .dispatch()
        .request_ride(user, body.pickup, body.dropoff)
        .await?;
    Ok((StatusCode::CREATED, Json(RideView::new(&ride, true))))
}

/// Ride details.
///
/// GET /api/rides/{id}
///
/// # Errors
///
/// 403 for anyone not involved in the ride.
pub async fn show<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<RideId>,
) -> Result<Json<RideView>> {
    Ok(Json(state.dispatch().ride_view(principal, id).await?))
}

/// Accept an offered ride. Exactly one concurrent caller wins.
///
/// POST /api/rides/{id}/accept
///
/// # Errors
///
/// 409 if another captain got there first, 403 if never offered.
pub async fn accept<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
    Path(id): Path<RideId>,
) -> Result<Json<RideView>> {
    let ride = state.dispatch().accept_ride(captain, id).await?;
    Ok(captain_view(&ride))
}

/// Verify the user's OTP and start the ride.
///
/// POST /api/rides/{id}/start
///
/// # Errors
///
/// 400 on a wrong OTP, 423 once locked out.
pub async fn start<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
    Path(id): Path<RideId>,
    Json(body): Json<StartRequest>,
) -> Result<Json<RideView>> {
    let ride = state.dispatch().start_ride(captain, id, &body.otp).await?;
    Ok(captain_view(&ride))
}

/// Deliver and settle.
///
/// POST /api/rides/{id}/complete
///
/// # Errors
///
/// 409 unless the ride is started.
pub async fn complete<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
    Path(id): Path<RideId>,
) -> Result<Json<CompletedRide>> {
    let receipt = state.dispatch().complete_ride(captain, id).await?;
    Ok(Json(CompletedRide {
        ride: RideView::new(&receipt.ride, false),
        settlement: receipt.settlement,
    }))
}

/// Cancel as the user or shop, or withdraw as the assigned captain.
///
/// POST /api/rides/{id}/cancel
///
/// # Errors
///
/// 409 once the ride has started.
pub async fn cancel<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<RideId>,
    body: Option<Json<CancelRequest>>,
) -> Result<Json<CancelledRide>> {
    let Json(body) = body.unwrap_or_default();
    let outcome = state
        .dispatch()
        .cancel_ride(principal, id, body.reason.as_deref())
        .await?;
    let reveal_otp = principal.as_user() == Some(outcome.ride().user_id);
    let label = match outcome {
        CancelOutcome::Cancelled(_) => "cancelled",
        CancelOutcome::Reopened(_) => "reopened",
    };
    Ok(Json(CancelledRide {
        outcome: label,
        ride: RideView::new(outcome.ride(), reveal_otp),
    }))
}

/// Run another dispatch round now instead of waiting for the sweeper.
///
/// POST /api/rides/{id}/dispatch
///
/// # Errors
///
/// 403 unless the caller is the ride's shop.
pub async fn redispatch<S: DispatchStore>(
    State(state): State<AppState<S>>,
    Authenticated(principal): Authenticated,
    Path(id): Path<RideId>,
) -> Result<Json<DispatchOutcome>> {
    Ok(Json(state.dispatch().redispatch_ride(principal, id).await?))
}
