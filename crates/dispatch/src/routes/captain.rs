//! Captain self-service endpoints.
//!
//! Location can also be streamed over the socket; see [`super::ws`].

use axum::{Json, extract::State};
use serde::Deserialize;
use tiffin_core::{CaptainAvailability, GeoPoint};

use crate::error::Result;
use crate::middleware::RequireCaptain;
use crate::models::Captain;
use crate::services::dispatch::CaptainEarnings;
use crate::state::AppState;
use crate::store::DispatchStore;

/// Body of `PUT /api/captain/availability`.
#[derive(Debug, Deserialize)]
pub struct AvailabilityRequest {
    pub availability: CaptainAvailability,
}

/// PUT /api/captain/location
///
/// # Errors
///
/// 400 for out-of-range coordinates (rejected by the extractor).
pub async fn update_location<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
    Json(location): Json<GeoPoint>,
) -> Result<Json<Captain>> {
    let captain = state
        .dispatch()
        .update_captain_location(captain, location)
        .await?;
    Ok(Json(captain))
}

/// PUT /api/captain/availability
///
/// # Errors
///
/// 409 while on a ride, 400 when asking for `on_ride`.
pub async fn set_availability<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
    Json(body): Json<AvailabilityRequest>,
) -> Result<Json<Captain>> {
    let captain = state
        .dispatch()
        .set_captain_availability(captain, body.availability)
        .await?;
    Ok(Json(captain))
}

/// GET /api/captain/earnings
///
/// # Errors
///
/// 404 if the captain record is gone.
pub async fn earnings<S: DispatchStore>(
    State(state): State<AppState<S>>,
    RequireCaptain(captain): RequireCaptain,
) -> Result<Json<CaptainEarnings>> {
    Ok(Json(state.dispatch().captain_earnings(captain).await?))
}
