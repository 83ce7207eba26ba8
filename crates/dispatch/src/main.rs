//! Tiffin dispatch service.
//!
//! Serves the order and ride API, the realtime socket and the background
//! sweeper that re-dispatches or expires unanswered rides.
//!
//! # Architecture
//!
//! - Axum for HTTP and WebSocket
//! - `PostgreSQL` store (or in-memory with `DISPATCH_STORE=memory`)
//! - In-process notification hub with a bounded retry outbox
//! - Sentry for errors and traces

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use sentry::integrations::tracing as sentry_tracing;
use tiffin_dispatch::config::{DispatchConfig, StoreBackend};
use tiffin_dispatch::db::{self, PgStore};
use tiffin_dispatch::middleware::api_rate_limiter;
use tiffin_dispatch::routes;
use tiffin_dispatch::services::dispatch::spawn_sweeper;
use tiffin_dispatch::state::AppState;
use tiffin_dispatch::store::{DispatchStore, MemoryStore};
use tokio::sync::oneshot;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long queued notifications may take to flush on shutdown.
const OUTBOX_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &DispatchConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            sample_rate: config.sentry_sample_rate,
            traces_sample_rate: config.sentry_traces_sample_rate,
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    // Load configuration from environment (needed for Sentry init)
    let config = DispatchConfig::from_env().expect("Failed to load configuration");

    // Initialize Sentry (must be done before tracing subscriber)
    let _sentry_guard = init_sentry(&config);

    // Defaults to info level for our crate if RUST_LOG is not set
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tiffin_dispatch=info,tower_http=debug".into());

    let json_layer = config
        .log_json
        .then(|| tracing_subscriber::fmt::layer().json().flatten_event(true));
    let text_layer = (!config.log_json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    match config.store {
        StoreBackend::Postgres => {
            let database_url = config
                .database_url
                .as_ref()
                .expect("Postgres store requires a database URL");
            let pool = db::create_pool(database_url)
                .await
                .expect("Failed to create database pool");
            tracing::info!("Database pool created");

            // NOTE: Migrations are NOT run automatically on startup.
            // Run them explicitly via: cargo run -p tiffin-cli -- migrate
            serve(config, Arc::new(PgStore::new(pool))).await;
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; all data is lost on exit");
            serve(config, Arc::new(MemoryStore::new())).await;
        }
    }
}

/// Run the server and its background tasks until shutdown.
async fn serve<S: DispatchStore>(config: DispatchConfig, store: Arc<S>) {
    let addr = config.socket_addr();
    let sweep_interval = config.sweep_interval;
    let limiter = api_rate_limiter(config.rate_limit_replenish_secs, config.rate_limit_burst);
    if limiter.is_none() {
        tracing::warn!("API rate limiting disabled");
    }

    let (state, worker) = AppState::new(config, store);
    let (close_outbox, outbox_closed) = oneshot::channel::<()>();
    let outbox = tokio::spawn(worker.run(async {
        outbox_closed.await.ok();
    }));
    let sweeper = spawn_sweeper(state.dispatch().clone(), sweep_interval);

    let app = routes::router(state, limiter);

    tracing::info!("dispatch listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .expect("Server error");

    sweeper.abort();
    // Open sockets still hold outbox senders, so close it explicitly.
    close_outbox.send(()).ok();
    if tokio::time::timeout(OUTBOX_FLUSH_TIMEOUT, outbox).await.is_err() {
        tracing::warn!("Outbox did not drain before shutdown");
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
