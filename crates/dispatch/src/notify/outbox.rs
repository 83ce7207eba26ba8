//! Bounded queue of notifications delivered off the request path.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use super::{DeliveryReport, Event, Notifier, RetryPolicy, fan_out};
use crate::models::{NotificationRecord, Principal};
use crate::store::DispatchStore;

/// Upper bound on deliveries running at once.
const MAX_IN_FLIGHT: usize = 256;

#[derive(Debug)]
struct Envelope {
    recipients: Vec<Principal>,
    event: Event,
}

/// Sending half: cheap to clone, never blocks.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Envelope>,
}

impl Outbox {
    /// Queue `event` for every recipient.
    ///
    /// If the queue is full the event is dropped and logged; ride state has
    /// already been committed and does not depend on delivery.
    pub fn enqueue(&self, recipients: Vec<Principal>, event: Event) {
        if recipients.is_empty() {
            return;
        }
        let name = event.name();
        let ride_id = event.ride_id();
        if let Err(e) = self.tx.try_send(Envelope { recipients, event }) {
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "worker stopped",
            };
            error!(event = name, %ride_id, reason, "Dropping notification");
        }
    }
}

/// Receiving half: delivers queued events with retry and logs every outcome.
pub struct OutboxWorker<S, N> {
    rx: mpsc::Receiver<Envelope>,
    store: Arc<S>,
    notifier: Arc<N>,
    policy: RetryPolicy,
}

/// Create a connected outbox and worker.
pub(crate) fn channel<S, N>(
    capacity: usize,
    store: Arc<S>,
    notifier: Arc<N>,
    policy: RetryPolicy,
) -> (Outbox, OutboxWorker<S, N>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        Outbox { tx },
        OutboxWorker {
            rx,
            store,
            notifier,
            policy,
        },
    )
}

impl<S: DispatchStore, N: Notifier> OutboxWorker<S, N> {
    /// Deliver events until `shutdown` resolves or every [`Outbox`] handle
    /// is dropped.
    ///
    /// Each envelope runs in its own task so one unreachable recipient's
    /// retries never hold up the queue. On shutdown the queue stops taking
    /// events, and `run` returns only once everything already queued has
    /// been delivered or given up on.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        let permits = Arc::new(Semaphore::new(MAX_IN_FLIGHT));
        let mut deliveries = JoinSet::new();
        let mut shutdown = pin!(shutdown);
        let mut closing = false;

        loop {
            tokio::select! {
                biased;
                () = &mut shutdown, if !closing => {
                    closing = true;
                    self.rx.close();
                    info!("Notification outbox closing");
                }
                Some(done) = deliveries.join_next(), if !deliveries.is_empty() => {
                    log_join(done);
                }
                envelope = self.rx.recv() => {
                    let Some(envelope) = envelope else { break };
                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let store = Arc::clone(&self.store);
                    let notifier = Arc::clone(&self.notifier);
                    let policy = self.policy;
                    deliveries.spawn(async move {
                        deliver_envelope(&*store, &*notifier, &policy, envelope).await;
                        drop(permit);
                    });
                }
            }
        }

        while let Some(done) = deliveries.join_next().await {
            log_join(done);
        }
        info!("Notification outbox closed");
    }

    /// Deliver everything queued so far on the current task, then return.
    pub async fn drain(&mut self) {
        while let Ok(envelope) = self.rx.try_recv() {
            deliver_envelope(&*self.store, &*self.notifier, &self.policy, envelope).await;
        }
    }
}

fn log_join(done: Result<(), JoinError>) {
    if let Err(e) = done {
        error!(error = %e, "Notification delivery task failed");
    }
}

async fn deliver_envelope<S: DispatchStore, N: Notifier>(
    store: &S,
    notifier: &N,
    policy: &RetryPolicy,
    envelope: Envelope,
) {
    let reports = fan_out(notifier, policy, &envelope.recipients, &envelope.event).await;
    record_reports(store, &envelope.event, &reports).await;
}

/// Append delivery outcomes to the store's notification log.
///
/// A failure to log is itself only logged.
pub(crate) async fn record_reports<S: DispatchStore>(
    store: &S,
    event: &Event,
    reports: &[DeliveryReport],
) {
    let now = Utc::now();
    for report in reports {
        let record = NotificationRecord {
            ride_id: Some(event.ride_id()),
            recipient: report.recipient,
            event: event.name().to_owned(),
            attempts: report.attempts,
            delivered: report.delivered,
            last_error: report.last_error.clone(),
            created_at: now,
        };
        if let Err(e) = store.record_notification(&record).await {
            warn!(error = %e, event = event.name(), "Failed to record notification outcome");
        }
    }
}
