//! Ride lifecycle: dispatch, accept, start, complete and cancel.

use std::collections::HashSet;

use chrono::{DateTime, TimeDelta, Utc};
use futures::future::join_all;
use tiffin_core::{CaptainId, Money, RideId, RideStatus, Settlement};
use tracing::{info, instrument, warn};

use super::{
    CancelOutcome, CompletionReceipt, DispatchError, DispatchOutcome, DispatchService,
    ride_parties,
};
use crate::models::{NearbyCaptain, Principal, Ride, RideView, Role};
use crate::notify::{Event, Notifier, deliver_with_retry, record_reports};
use crate::store::{DispatchStore, StoreError};

/// Longest accepted cancellation reason.
const MAX_REASON_LEN: usize = 500;

impl<S: DispatchStore, N: Notifier> DispatchService<S, N> {
    /// Run one dispatch round for a `requested` ride.
    ///
    /// Searches the configured radii in order until a radius yields
    /// captains nobody has offered this ride to yet, records up to
    /// `max_offers` of them and notifies each concurrently. A round with no
    /// candidates still counts; the sweeper tries again later.
    ///
    /// # Errors
    ///
    /// `InvalidRideState` unless the ride is `requested`.
    pub async fn dispatch_ride(&self, ride_id: RideId) -> Result<DispatchOutcome, DispatchError> {
        self.dispatch_ride_at(ride_id, Utc::now()).await
    }

    #[instrument(skip(self, now), fields(ride_id = %ride_id))]
    pub(super) async fn dispatch_ride_at(
        &self,
        ride_id: RideId,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        if ride.status != RideStatus::Requested {
            return Err(DispatchError::InvalidRideState {
                actual: ride.status,
            });
        }

        let offered: HashSet<CaptainId> = self.store.ride_offers(ride_id).await?.into_iter().collect();
        let candidates = self.find_candidates(&ride, &offered, now).await?;
        let ids: Vec<CaptainId> = candidates.iter().map(|c| c.captain.id).collect();

        let ride = self.store.record_offers(ride_id, &ids, now).await?;
        if candidates.is_empty() {
            info!(round = ride.dispatch_attempts, "No captains in range");
            return Ok(DispatchOutcome {
                ride_id,
                round: ride.dispatch_attempts,
                candidates: ids,
                delivered: 0,
                failed: 0,
            });
        }

        let policy = self.settings.retry;
        let offers = candidates.iter().map(|nearby| {
            let event = Event::RideOffered {
                ride_id,
                pickup: ride.pickup,
                dropoff: ride.dropoff,
                distance_km: ride.distance_km,
                fare: ride.fare,
                pickup_distance_km: nearby.distance_km,
            };
            let recipient = Principal::captain(nearby.captain.id);
            async move {
                let report = deliver_with_retry(&*self.notifier, &policy, recipient, &event).await;
                (event, report)
            }
        });

        let mut delivered = 0;
        for (event, report) in join_all(offers).await {
            if report.delivered {
                delivered += 1;
            }
            record_reports(&*self.store, &event, std::slice::from_ref(&report)).await;
        }
        let failed = ids.len() - delivered;

        info!(
            round = ride.dispatch_attempts,
            candidates = ids.len(),
            delivered,
            failed,
            "Ride offered"
        );
        Ok(DispatchOutcome {
            ride_id,
            round: ride.dispatch_attempts,
            candidates: ids,
            delivered,
            failed,
        })
    }

    /// Nearest fresh, available captains not yet offered the ride, from the
    /// first radius that has any.
    async fn find_candidates(
        &self,
        ride: &Ride,
        offered: &HashSet<CaptainId>,
        now: DateTime<Utc>,
    ) -> Result<Vec<NearbyCaptain>, DispatchError> {
        let freshness =
            TimeDelta::from_std(self.settings.location_freshness).unwrap_or(TimeDelta::MAX);
        let fresh_since = now
            .checked_sub_signed(freshness)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let max_offers = self.settings.max_offers;

        for &radius_km in &self.settings.radii_km {
            let found: Vec<NearbyCaptain> = self
                .store
                .available_captains_within(ride.pickup, radius_km, fresh_since, max_offers + offered.len())
                .await?
                .into_iter()
                .filter(|nearby| !offered.contains(&nearby.captain.id))
                .take(max_offers)
                .collect();
            if !found.is_empty() {
                return Ok(found);
            }
        }
        Ok(Vec::new())
    }

    /// A captain claims a ride they were offered.
    ///
    /// Exactly one of any number of concurrent accepts succeeds; the rest get
    /// `RideAlreadyTaken`.
    ///
    /// # Errors
    ///
    /// `NotOffered` (also after the captain withdrew from the ride),
    /// `RideAlreadyTaken`, `CaptainUnavailable`, or `InvalidRideState` for a
    /// closed ride.
    #[instrument(skip(self), fields(captain_id = %captain, ride_id = %ride_id))]
    pub async fn accept_ride(&self, captain: CaptainId, ride_id: RideId) -> Result<Ride, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        let offered = self.store.ride_offers(ride_id).await?;
        if !self.holds_open_offer(&offered, captain, ride_id).await? {
            return Err(DispatchError::NotOffered);
        }
        if ride.status.is_terminal() {
            return Err(DispatchError::InvalidRideState {
                actual: ride.status,
            });
        }

        let ride = self
            .store
            .assign_captain(ride_id, captain, Utc::now())
            .await?;
        info!("Ride accepted");

        if let Some(details) = self.store.captain(captain).await? {
            self.notify(
                ride_parties(&ride),
                Event::RideAccepted {
                    ride_id,
                    captain_id: captain,
                    captain_name: details.name,
                    vehicle: details.vehicle,
                },
            );
        }
        let losers: Vec<Principal> = offered
            .into_iter()
            .filter(|&id| id != captain)
            .map(Principal::captain)
            .collect();
        self.notify(losers, Event::RideTaken { ride_id });

        Ok(ride)
    }

    /// The assigned captain presents the user's OTP at pickup.
    ///
    /// # Errors
    ///
    /// `InvalidOtp` on a mismatch, `OtpLocked` once the attempt budget is
    /// spent, `Forbidden` for anyone but the assigned captain.
    #[instrument(skip(self, otp), fields(captain_id = %captain, ride_id = %ride_id))]
    pub async fn start_ride(
        &self,
        captain: CaptainId,
        ride_id: RideId,
        otp: &str,
    ) -> Result<Ride, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        if !ride.is_assigned_to(captain) {
            return Err(DispatchError::Forbidden);
        }
        if ride.status != RideStatus::Accepted {
            return Err(DispatchError::InvalidRideState {
                actual: ride.status,
            });
        }

        let max_attempts = self.settings.max_otp_attempts;
        let used = self
            .store
            .reserve_otp_attempt(ride_id, captain, max_attempts, Utc::now())
            .await?;
        if !ride.otp.matches(otp.trim()) {
            let remaining = max_attempts.saturating_sub(used);
            warn!(attempts = used, remaining, "Invalid OTP presented");
            return Err(DispatchError::InvalidOtp { remaining });
        }

        let ride = self.store.mark_started(ride_id, captain, Utc::now()).await?;
        info!("Ride started");
        self.notify(ride_parties(&ride), Event::RideStarted { ride_id });
        Ok(ride)
    }

    /// The assigned captain delivers; the ride is settled into the ledger.
    ///
    /// Settlement happens at most once: a repeated call fails with
    /// `InvalidRideState` and credits nothing.
    ///
    /// # Errors
    ///
    /// `Forbidden` for anyone but the assigned captain, `InvalidRideState`
    /// unless the ride is `started`.
    #[instrument(skip(self), fields(captain_id = %captain, ride_id = %ride_id))]
    pub async fn complete_ride(
        &self,
        captain: CaptainId,
        ride_id: RideId,
    ) -> Result<CompletionReceipt, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        if !ride.is_assigned_to(captain) {
            return Err(DispatchError::Forbidden);
        }
        if ride.status != RideStatus::Started {
            return Err(DispatchError::InvalidRideState {
                actual: ride.status,
            });
        }

        let subtotal = match ride.order_id {
            Some(order_id) => {
                self.store
                    .order(order_id)
                    .await?
                    .ok_or_else(|| {
                        StoreError::DataCorruption(format!("ride {ride_id} order {order_id} missing"))
                    })?
                    .subtotal
            }
            None => Money::ZERO,
        };
        let settlement = Settlement::compute(subtotal, ride.fare, self.settings.commission)?;

        let ride = self
            .store
            .settle_ride(ride_id, captain, &settlement, Utc::now())
            .await?;
        info!(
            captain_earning = %settlement.captain_earning,
            shop_payout = %settlement.shop_payout,
            platform_commission = %settlement.platform_commission,
            "Ride completed and settled"
        );

        let mut recipients = ride_parties(&ride);
        recipients.push(Principal::captain(captain));
        self.notify(
            recipients,
            Event::RideCompleted {
                ride_id,
                fare: ride.fare,
            },
        );
        Ok(CompletionReceipt { ride, settlement })
    }

    /// Cancel a ride, or withdraw from it when the caller is its captain.
    ///
    /// The user or shop may cancel while the ride is `requested` or
    /// `accepted`; the order is cancelled with it. The assigned captain may
    /// give an `accepted` ride back, which reopens it for other captains.
    ///
    /// # Errors
    ///
    /// `Forbidden` for non-participants, `InvalidRideState` once started or
    /// closed.
    #[instrument(skip(self, reason), fields(principal = %principal, ride_id = %ride_id))]
    pub async fn cancel_ride(
        &self,
        principal: Principal,
        ride_id: RideId,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        let reason = reason.map(str::trim).filter(|r| !r.is_empty());
        if reason.is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(DispatchError::Validation(format!(
                "reason must be at most {MAX_REASON_LEN} characters"
            )));
        }

        match principal.role {
            Role::User | Role::Shop if is_requester(principal, &ride) => {
                if !ride.status.is_cancellable() {
                    return Err(DispatchError::InvalidRideState {
                        actual: ride.status,
                    });
                }
                let reason = reason.map_or_else(
                    || format!("cancelled by {}", principal.role),
                    str::to_owned,
                );
                let offered = self.store.ride_offers(ride_id).await?;
                let ride = self.store.cancel_ride(ride_id, &reason, Utc::now()).await?;
                info!(reason = %reason, "Ride cancelled");

                let mut recipients = ride_parties(&ride);
                match ride.captain_id {
                    Some(captain) => recipients.push(Principal::captain(captain)),
                    None => recipients.extend(offered.into_iter().map(Principal::captain)),
                }
                recipients.retain(|&p| p != principal);
                self.notify(recipients, Event::RideCancelled { ride_id, reason });
                Ok(CancelOutcome::Cancelled(ride))
            }
            Role::Captain => {
                let captain = principal
                    .as_captain()
                    .filter(|&id| ride.is_assigned_to(id))
                    .ok_or(DispatchError::Forbidden)?;
                if ride.status != RideStatus::Accepted {
                    return Err(DispatchError::InvalidRideState {
                        actual: ride.status,
                    });
                }
                let ride = self
                    .store
                    .withdraw_captain(ride_id, captain, Utc::now())
                    .await?;
                info!(reason = reason.unwrap_or_default(), "Captain withdrew, ride reopened");

                self.notify(ride_parties(&ride), Event::RideReopened { ride_id });
                self.spawn_dispatch(ride_id);
                Ok(CancelOutcome::Reopened(ride))
            }
            Role::User | Role::Shop => Err(DispatchError::Forbidden),
        }
    }

    /// A ride as the given participant may see it.
    ///
    /// The user sees the OTP; the shop, the assigned captain and captains
    /// holding an open offer do not.
    ///
    /// # Errors
    ///
    /// `Forbidden` for anyone else.
    pub async fn ride_view(&self, principal: Principal, ride_id: RideId) -> Result<RideView, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        let allowed = match principal.role {
            Role::User | Role::Shop => is_requester(principal, &ride),
            Role::Captain => {
                let captain = CaptainId::new(principal.id);
                ride.is_assigned_to(captain)
                    || (ride.status == RideStatus::Requested
                        && self
                            .holds_open_offer(&self.store.ride_offers(ride_id).await?, captain, ride_id)
                            .await?)
            }
        };
        if !allowed {
            return Err(DispatchError::Forbidden);
        }
        Ok(RideView::new(&ride, principal.role == Role::User))
    }

    /// Whether `captain` is among `offered` and has not withdrawn since.
    async fn holds_open_offer(
        &self,
        offered: &[CaptainId],
        captain: CaptainId,
        ride_id: RideId,
    ) -> Result<bool, DispatchError> {
        if !offered.contains(&captain) {
            return Ok(false);
        }
        Ok(!self.store.withdrawn_captains(ride_id).await?.contains(&captain))
    }

    /// The shop re-runs dispatch for one of its `requested` rides.
    ///
    /// # Errors
    ///
    /// `Forbidden` for other shops, otherwise as [`Self::dispatch_ride`].
    pub async fn redispatch_ride(
        &self,
        principal: Principal,
        ride_id: RideId,
    ) -> Result<DispatchOutcome, DispatchError> {
        let ride = self.load_ride(ride_id).await?;
        if principal.role != Role::Shop || !is_requester(principal, &ride) {
            return Err(DispatchError::Forbidden);
        }
        self.dispatch_ride(ride_id).await
    }
}

/// Whether `principal` is the ride's user or its shop.
fn is_requester(principal: Principal, ride: &Ride) -> bool {
    match principal.role {
        Role::User => principal.as_user() == Some(ride.user_id),
        Role::Shop => principal.as_shop() == ride.shop_id,
        Role::Captain => false,
    }
}
