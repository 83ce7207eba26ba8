//! Captain presence and earnings.

use chrono::Utc;
use tiffin_core::{CaptainAvailability, CaptainId, GeoPoint};
use tracing::{debug, info, instrument};

use super::{CaptainEarnings, DispatchError, DispatchService, RECENT_ENTRIES};
use crate::models::{Captain, LedgerAccount};
use crate::notify::Notifier;
use crate::store::DispatchStore;

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// Store a captain's live position.
    ///
    /// # Errors
    ///
    /// `NotFound` if the captain does not exist.
    pub async fn update_captain_location(
        &self,
        captain: CaptainId,
        location: GeoPoint,
    ) -> Result<Captain, DispatchError> {
        let updated = self
            .store
            .update_captain_location(captain, location, Utc::now())
            .await?;
        debug!(captain_id = %captain, lat = location.lat(), lng = location.lng(), "Captain location updated");
        Ok(updated)
    }

    /// Go online or offline.
    ///
    /// `on_ride` is managed by the engine and cannot be requested.
    ///
    /// # Errors
    ///
    /// `Validation` for `on_ride`, `CaptainOnRide` while assigned to a ride.
    #[instrument(skip(self), fields(captain_id = %captain, availability = %availability))]
    pub async fn set_captain_availability(
        &self,
        captain: CaptainId,
        availability: CaptainAvailability,
    ) -> Result<Captain, DispatchError> {
        if availability == CaptainAvailability::OnRide {
            return Err(DispatchError::Validation(
                "availability must be offline or available".to_owned(),
            ));
        }
        let updated = self
            .store
            .set_captain_availability(captain, availability)
            .await?;
        info!("Captain availability changed");
        Ok(updated)
    }

    /// Balance, lifetime totals and the latest ledger entries.
    ///
    /// # Errors
    ///
    /// `NotFound` if the captain does not exist.
    pub async fn captain_earnings(&self, captain: CaptainId) -> Result<CaptainEarnings, DispatchError> {
        let details = self
            .store
            .captain(captain)
            .await?
            .ok_or(DispatchError::NotFound("captain"))?;
        let recent_entries = self
            .store
            .ledger_entries(LedgerAccount::Captain(captain), RECENT_ENTRIES)
            .await?;
        Ok(CaptainEarnings {
            captain_id: captain,
            balance: details.earnings_balance,
            lifetime_earnings: details.lifetime_earnings,
            rides_completed: details.rides_completed,
            recent_entries,
        })
    }
}
