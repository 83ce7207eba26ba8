//! Retrying delivery with capped exponential backoff and full jitter.

use std::time::Duration;

use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, warn};

use super::{DeliveryError, Event, Notifier};
use crate::models::Principal;

/// How many times, and how patiently, to retry one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; at least 1.
    pub max_attempts: u32,
    /// Delay cap before the second attempt.
    pub base_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Upper bound of the wait after failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt - 1), max)`.
    #[must_use]
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1_u32 << exponent)
            .min(self.max_delay)
    }

    /// Wait after failed attempt `attempt`, drawn uniformly from
    /// `[0, backoff_ceiling(attempt)]`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        if ceiling.is_zero() {
            return ceiling;
        }
        rand::rng().random_range(Duration::ZERO..=ceiling)
    }
}

/// Outcome of delivering one event to one recipient.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    /// Who it was for.
    pub recipient: Principal,
    /// Attempts made.
    pub attempts: u32,
    /// Whether an attempt succeeded.
    pub delivered: bool,
    /// Error from the last failed attempt.
    pub last_error: Option<String>,
}

/// Deliver `event` to `recipient`, retrying failures per `policy`.
///
/// Never fails: the report says whether delivery succeeded.
pub async fn deliver_with_retry<N: Notifier>(
    notifier: &N,
    policy: &RetryPolicy,
    recipient: Principal,
    event: &Event,
) -> DeliveryReport {
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error: Option<DeliveryError> = None;

    for attempt in 1..=max_attempts {
        match notifier.deliver(recipient, event).await {
            Ok(()) => {
                debug!(%recipient, event = event.name(), attempt, "Notification delivered");
                return DeliveryReport {
                    recipient,
                    attempts: attempt,
                    delivered: true,
                    last_error: None,
                };
            }
            Err(e) => {
                debug!(%recipient, event = event.name(), attempt, error = %e, "Delivery attempt failed");
                last_error = Some(e);
                if attempt < max_attempts {
                    tokio::time::sleep(policy.backoff(attempt)).await;
                }
            }
        }
    }

    let last_error = last_error.map(|e| e.to_string());
    warn!(
        %recipient,
        event = event.name(),
        ride_id = %event.ride_id(),
        attempts = max_attempts,
        error = last_error.as_deref().unwrap_or_default(),
        "Notification undeliverable"
    );
    DeliveryReport {
        recipient,
        attempts: max_attempts,
        delivered: false,
        last_error,
    }
}

/// Deliver `event` to every recipient concurrently.
///
/// Recipients are independent: a slow or failing one delays nobody else.
/// Reports come back in recipient order.
pub async fn fan_out<N: Notifier>(
    notifier: &N,
    policy: &RetryPolicy,
    recipients: &[Principal],
    event: &Event,
) -> Vec<DeliveryReport> {
    join_all(
        recipients
            .iter()
            .map(|&recipient| deliver_with_retry(notifier, policy, recipient, event)),
    )
    .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tiffin_core::{RideId, UserId};

    use super::*;

    /// Fails the first `failures` attempts per recipient, then succeeds.
    struct Flaky {
        failures: u32,
        seen: Mutex<HashMap<Principal, u32>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Self {
            Self {
                failures,
                seen: Mutex::new(HashMap::new()),
            }
        }
    }

    impl Notifier for Flaky {
        async fn deliver(&self, recipient: Principal, _event: &Event) -> Result<(), DeliveryError> {
            let mut seen = self.seen.lock().unwrap();
            let count = seen.entry(recipient).or_default();
            *count += 1;
            if *count <= self.failures {
                Err(DeliveryError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    fn event() -> Event {
        Event::RideStarted {
            ride_id: RideId::new(1),
        }
    }

    #[test]
    fn test_backoff_ceiling_doubles_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
        };
        assert_eq!(policy.backoff_ceiling(1), Duration::from_millis(100));
        assert_eq!(policy.backoff_ceiling(2), Duration::from_millis(200));
        assert_eq!(policy.backoff_ceiling(4), Duration::from_millis(800));
        assert_eq!(policy.backoff_ceiling(5), Duration::from_millis(1_000));
        assert_eq!(policy.backoff_ceiling(200), Duration::from_millis(1_000));
    }

    #[test]
    fn test_backoff_is_jittered_within_ceiling() {
        let policy = RetryPolicy::default();
        for attempt in 1..6 {
            let ceiling = policy.backoff_ceiling(attempt);
            for _ in 0..50 {
                assert!(policy.backoff(attempt) <= ceiling);
            }
        }
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let notifier = Flaky::new(2);
        let report =
            deliver_with_retry(&notifier, &fast_policy(4), Principal::user(UserId::new(1)), &event())
                .await;
        assert!(report.delivered);
        assert_eq!(report.attempts, 3);
        assert!(report.last_error.is_none());
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let notifier = Flaky::new(u32::MAX);
        let report =
            deliver_with_retry(&notifier, &fast_policy(3), Principal::user(UserId::new(1)), &event())
                .await;
        assert!(!report.delivered);
        assert_eq!(report.attempts, 3);
        assert_eq!(report.last_error.as_deref(), Some("recipient not connected"));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let notifier = Flaky::new(0);
        let report =
            deliver_with_retry(&notifier, &fast_policy(0), Principal::user(UserId::new(1)), &event())
                .await;
        assert!(report.delivered);
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_fan_out_reports_each_recipient() {
        let notifier = Flaky::new(1);
        let recipients = [
            Principal::user(UserId::new(1)),
            Principal::user(UserId::new(2)),
        ];
        let reports = fan_out(&notifier, &fast_policy(1), &recipients, &event()).await;
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| !r.delivered));

        let reports = fan_out(&notifier, &fast_policy(2), &recipients, &event()).await;
        assert!(reports.iter().all(|r| r.delivered));
    }
}
