//! In-process registry of connected sockets.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{RwLock, mpsc};
use tracing::debug;

use super::{DeliveryError, Event, Notifier};
use crate::models::Principal;

struct Connection {
    id: u64,
    tx: mpsc::Sender<Event>,
}

/// Routes events to every open socket of a principal.
///
/// Each socket owns a bounded queue; a principal may have several sockets
/// (e.g. phone and tablet). Closed queues are pruned on delivery.
pub struct Hub {
    connections: RwLock<HashMap<Principal, Vec<Connection>>>,
    next_id: AtomicU64,
    capacity: usize,
}

/// A socket's receiving end, returned by [`Hub::subscribe`].
#[derive(Debug)]
pub struct Subscription {
    /// Connection ID, for [`Hub::unsubscribe`].
    pub id: u64,
    /// Who the socket belongs to.
    pub principal: Principal,
    /// Events to forward to the socket.
    pub rx: mpsc::Receiver<Event>,
}

impl Hub {
    /// Create a hub whose per-socket queues hold `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Register a new socket for `principal`.
    pub async fn subscribe(&self, principal: Principal) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.connections
            .write()
            .await
            .entry(principal)
            .or_default()
            .push(Connection { id, tx });
        debug!(%principal, connection_id = id, "Socket subscribed");
        Subscription { id, principal, rx }
    }

    /// Remove a socket.
    pub async fn unsubscribe(&self, principal: Principal, id: u64) {
        let mut connections = self.connections.write().await;
        if let Some(list) = connections.get_mut(&principal) {
            list.retain(|c| c.id != id);
            if list.is_empty() {
                connections.remove(&principal);
            }
        }
        debug!(%principal, connection_id = id, "Socket unsubscribed");
    }

    /// Open sockets for `principal`.
    #[cfg(test)]
    pub(crate) async fn connection_count(&self, principal: Principal) -> usize {
        self.connections
            .read()
            .await
            .get(&principal)
            .map_or(0, Vec::len)
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(64)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

impl Notifier for Hub {
    async fn deliver(&self, recipient: Principal, event: &Event) -> Result<(), DeliveryError> {
        let mut connections = self.connections.write().await;
        let Some(list) = connections.get_mut(&recipient) else {
            return Err(DeliveryError::NotConnected);
        };

        let mut delivered = false;
        list.retain(|c| match c.tx.try_send(event.clone()) {
            Ok(()) => {
                delivered = true;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if list.is_empty() {
            connections.remove(&recipient);
            return Err(DeliveryError::NotConnected);
        }
        if delivered {
            Ok(())
        } else {
            Err(DeliveryError::Backpressure)
        }
    }
}
