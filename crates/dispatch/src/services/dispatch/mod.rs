//! The dispatch engine.
//!
//! [`DispatchService`] turns confirmed orders into rides, offers them to
//! nearby captains, lets exactly one captain accept, gates pickup on the
//! user's OTP and settles completed rides into the ledger.
//!
//! # Ride flow
//!
//! ```text
//! confirm_order ─▶ dispatch_ride ─▶ accept_ride ─▶ start_ride ─▶ complete_ride
//!                      ▲   │                │
//!                      │   └─ sweeper ──────┼──▶ expire (rounds exhausted)
//!                      └──── withdraw ◀─────┘
//! ```
//!
//! Every state change is a single compare-and-set in the store, so the
//! service never holds locks of its own. Notifications are sent after the
//! change has been committed and never affect it: ride offers are delivered
//! inline so the caller learns how many captains were reached, everything
//! else goes through the [`Outbox`].

mod captains;
mod error;
mod ledger;
mod orders;
mod rides;
mod sweeper;
mod types;

#[cfg(test)]
mod tests;

use std::fmt;
use std::sync::Arc;

use tiffin_core::RideId;
use tracing::warn;

pub use error::DispatchError;
pub use sweeper::spawn_sweeper;
pub use types::{
    CaptainEarnings, CancelOutcome, CompletionReceipt, DispatchOutcome, PlaceOrder, ShopBalance,
    SweepReport,
};

use crate::config::DispatchSettings;
use crate::models::{Principal, Ride};
use crate::notify::{Event, Notifier, Outbox, OutboxWorker, outbox_channel};
use crate::store::DispatchStore;

/// Ledger entries returned with summaries.
const RECENT_ENTRIES: usize = 20;

/// Coordinates orders, rides, captains and ledgers.
///
/// Cheap to clone; clones share the store, notifier and outbox.
pub struct DispatchService<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    outbox: Outbox,
    settings: Arc<DispatchSettings>,
}

impl<S, N> Clone for DispatchService<S, N> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            notifier: Arc::clone(&self.notifier),
            outbox: self.outbox.clone(),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<S, N> fmt::Debug for DispatchService<S, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchService")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// Create the service and the worker that drains its outbox.
    ///
    /// The worker must be spawned (or drained) for queued notifications to
    /// go anywhere.
    #[must_use]
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        settings: DispatchSettings,
        queue_capacity: usize,
    ) -> (Self, OutboxWorker<S, N>) {
        let (outbox, worker) = outbox_channel(
            queue_capacity,
            Arc::clone(&store),
            Arc::clone(&notifier),
            settings.retry,
        );
        let service = Self {
            store,
            notifier,
            outbox,
            settings: Arc::new(settings),
        };
        (service, worker)
    }

    /// The backing store.
    #[must_use]
    pub const fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The realtime transport.
    #[must_use]
    pub const fn notifier(&self) -> &Arc<N> {
        &self.notifier
    }

    /// Engine tuning.
    #[must_use]
    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Queue `event` for background delivery.
    fn notify(&self, recipients: Vec<Principal>, event: Event) {
        self.outbox.enqueue(recipients, event);
    }

    /// Run a dispatch round on a background task when auto dispatch is on.
    fn spawn_dispatch(&self, ride_id: RideId) {
        if !self.settings.auto_dispatch {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.dispatch_ride(ride_id).await {
                warn!(%ride_id, error = %e, "Background dispatch failed");
            }
        });
    }

    async fn load_ride(&self, ride_id: RideId) -> Result<Ride, DispatchError> {
        self.store
            .ride(ride_id)
            .await?
            .ok_or(DispatchError::NotFound("ride"))
    }
}

/// The user and shop of a ride.
fn ride_parties(ride: &Ride) -> Vec<Principal> {
    let mut parties = vec![Principal::user(ride.user_id)];
    parties.extend(ride.shop_id.map(Principal::shop));
    parties
}
