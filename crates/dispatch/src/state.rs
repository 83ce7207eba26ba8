//! Application state shared across handlers.

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::notify::{Hub, OutboxWorker};
use crate::services::auth::TokenSigner;
use crate::services::dispatch::DispatchService;
use crate::store::DispatchStore;

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// the dispatch service, the realtime hub and configuration.
pub struct AppState<S> {
    inner: Arc<AppStateInner<S>>,
}

struct AppStateInner<S> {
    config: DispatchConfig,
    dispatch: DispatchService<S, Hub>,
    hub: Arc<Hub>,
    signer: TokenSigner,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: DispatchStore> AppState<S> {
    /// Create a new application state.
    ///
    /// Returns the outbox worker alongside; the caller decides where it runs.
    ///
    /// # Arguments
    ///
    /// * `config` - Dispatch configuration
    /// * `store` - Backing store
    #[must_use]
    pub fn new(config: DispatchConfig, store: Arc<S>) -> (Self, OutboxWorker<S, Hub>) {
        let hub = Arc::new(Hub::new(config.socket_buffer));
        let (dispatch, worker) = DispatchService::new(
            store,
            Arc::clone(&hub),
            config.dispatch.clone(),
            config.notify_queue_capacity,
        );
        let signer = TokenSigner::new(config.token_secret.clone());

        let state = Self {
            inner: Arc::new(AppStateInner {
                config,
                dispatch,
                hub,
                signer,
            }),
        };
        (state, worker)
    }

    /// Get a reference to the dispatch configuration.
    #[must_use]
    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    /// Get a reference to the dispatch service.
    #[must_use]
    pub fn dispatch(&self) -> &DispatchService<S, Hub> {
        &self.inner.dispatch
    }

    /// Get a reference to the realtime hub.
    #[must_use]
    pub fn hub(&self) -> &Hub {
        &self.inner.hub
    }

    /// Get a reference to the token signer.
    #[must_use]
    pub fn signer(&self) -> &TokenSigner {
        &self.inner.signer
    }

    /// Get a reference to the backing store.
    #[must_use]
    pub fn store(&self) -> &S {
        self.inner.dispatch.store()
    }
}
