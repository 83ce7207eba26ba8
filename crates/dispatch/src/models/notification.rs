//! Delivery log of notifications sent to connected clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tiffin_core::RideId;

use super::Principal;

/// Outcome of delivering one event to one recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Ride the event concerns.
    pub ride_id: Option<RideId>,
    /// Who it was for.
    pub recipient: Principal,
    /// Event name, e.g. `ride_offered`.
    pub event: String,
    /// Attempts made, including the successful one.
    pub attempts: u32,
    /// Whether any attempt succeeded.
    pub delivered: bool,
    /// Error from the final failed attempt.
    pub last_error: Option<String>,
    /// When delivery finished.
    pub created_at: DateTime<Utc>,
}
