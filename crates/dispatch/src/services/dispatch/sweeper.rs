//! Periodic re-dispatch and expiry of rides nobody accepted.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use super::{DispatchError, DispatchService, SweepReport, ride_parties};
use crate::models::Principal;
use crate::notify::{Event, Notifier};
use crate::store::DispatchStore;

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// Give stale `requested` rides another round, or expire them once they
    /// have had `max_dispatch_rounds`.
    ///
    /// A ride is stale when its last round (or its creation, if never
    /// dispatched) is older than `offer_timeout`. Rides that change state
    /// mid-sweep are skipped.
    ///
    /// # Errors
    ///
    /// Fails only if the stale rides cannot be listed; per-ride failures are
    /// logged and skipped.
    #[instrument(skip(self, now))]
    pub async fn sweep_stale_rides(&self, now: DateTime<Utc>) -> Result<SweepReport, DispatchError> {
        let timeout = TimeDelta::from_std(self.settings.offer_timeout).unwrap_or(TimeDelta::MAX);
        let cutoff = now.checked_sub_signed(timeout).unwrap_or(DateTime::<Utc>::MIN_UTC);
        let max_rounds = i32::try_from(self.settings.max_dispatch_rounds).unwrap_or(i32::MAX);

        let mut report = SweepReport::default();
        for ride in self.store.stale_requested_rides(cutoff).await? {
            let ride_id = ride.id;
            if ride.dispatch_attempts < max_rounds {
                match self.dispatch_ride_at(ride_id, now).await {
                    Ok(_) => report.redispatched += 1,
                    Err(DispatchError::InvalidRideState { .. }) => {}
                    Err(e) => warn!(%ride_id, error = %e, "Re-dispatch failed"),
                }
                continue;
            }

            let offered = match self.store.ride_offers(ride_id).await {
                Ok(offered) => offered,
                Err(e) => {
                    warn!(%ride_id, error = %e, "Failed to load offers");
                    Vec::new()
                }
            };
            match self.store.expire_ride(ride_id, now).await {
                Ok(ride) => {
                    report.expired += 1;
                    info!(%ride_id, rounds = ride.dispatch_attempts, "Ride expired");
                    let mut recipients = ride_parties(&ride);
                    recipients.extend(offered.into_iter().map(Principal::captain));
                    self.notify(recipients, Event::RideExpired { ride_id });
                }
                Err(e) => warn!(%ride_id, error = %e, "Expiry skipped"),
            }
        }

        if report != SweepReport::default() {
            info!(
                redispatched = report.redispatched,
                expired = report.expired,
                "Stale ride sweep finished"
            );
        }
        Ok(report)
    }
}

/// Run [`DispatchService::sweep_stale_rides`] every `interval` until the
/// runtime shuts down.
pub fn spawn_sweeper<S: DispatchStore, N: Notifier>(
    service: DispatchService<S, N>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.sweep_stale_rides(Utc::now()).await {
                warn!(error = %e, "Stale ride sweep failed");
            }
        }
    })
}
