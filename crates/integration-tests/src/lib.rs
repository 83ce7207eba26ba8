//! Integration test harness for Tiffin.
//!
//! [`TestApp`] runs the full dispatch service (router, hub, outbox) on the
//! in-memory store with a seeded shop, user and three captains, so tests
//! exercise the same code paths as production without a database.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p tiffin-integration-tests
//! ```
//!
//! # Seeded Geography
//!
//! ```text
//! shop      12.9716, 77.5946
//! captain 0 ~0.5 km north   (inside the 3 km ring)
//! captain 1 ~2 km north     (inside the 3 km ring)
//! captain 2 ~6 km north     (only reached at 8 km)
//! dropoff   12.9352, 77.6245
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode, header};
use chrono::Utc;
use serde_json::{Value, json};
use tiffin_core::{CaptainAvailability, GeoPoint};
use tiffin_dispatch::config::DispatchConfig;
use tiffin_dispatch::models::{Captain, NewCaptain, NewShop, NewUser, Principal, Shop, User};
use tiffin_dispatch::notify::{Hub, OutboxWorker};
use tiffin_dispatch::routes;
use tiffin_dispatch::state::AppState;
use tiffin_dispatch::store::{DispatchStore, MemoryStore};
use tower::ServiceExt;

/// Token secret accepted by the config's strength checks.
pub const TEST_SECRET: &str = "aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6";

/// Where the seeded shop is.
pub const SHOP_LOCATION: (f64, f64) = (12.9716, 77.5946);

/// Where test orders are delivered.
pub const DROPOFF: (f64, f64) = (12.9352, 77.6245);

/// Seeded captain latitudes, nearest first.
const CAPTAIN_LATITUDES: [f64; 3] = [12.9761, 12.9896, 13.0256];

/// Configuration for tests: memory store, manual dispatch, fast retries.
///
/// # Panics
///
/// Panics if an override makes the configuration invalid.
#[must_use]
pub fn test_config(overrides: &[(&str, &str)]) -> DispatchConfig {
    let mut vars: HashMap<String, String> = [
        ("DISPATCH_STORE", "memory"),
        ("DISPATCH_TOKEN_SECRET", TEST_SECRET),
        ("DISPATCH_AUTO", "false"),
        ("NOTIFY_MAX_ATTEMPTS", "2"),
        ("NOTIFY_BASE_DELAY_MS", "0"),
        ("NOTIFY_MAX_DELAY_MS", "0"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_owned(), v.to_owned()))
    .collect();
    vars.extend(overrides.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())));
    DispatchConfig::from_lookup(|key| vars.get(key).cloned()).expect("valid test configuration")
}

/// A running service with seeded parties.
pub struct TestApp {
    pub state: AppState<MemoryStore>,
    pub store: Arc<MemoryStore>,
    pub worker: OutboxWorker<MemoryStore, Hub>,
    pub shop: Shop,
    pub user: User,
    pub captains: Vec<Captain>,
}

impl TestApp {
    /// Seed a fresh store and build the service with default test config.
    pub async fn spawn() -> Self {
        Self::spawn_with(&[]).await
    }

    /// As [`Self::spawn`], with config overrides.
    ///
    /// # Panics
    ///
    /// Panics if seeding fails.
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Self {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();

        let shop = store
            .insert_shop(
                &NewShop {
                    name: "Udupi Corner".to_owned(),
                    location: point(SHOP_LOCATION),
                },
                now,
            )
            .await
            .expect("seed shop");
        let user = store
            .insert_user(
                &NewUser {
                    name: "Asha".to_owned(),
                    phone: "+91 90000 00001".to_owned(),
                },
                now,
            )
            .await
            .expect("seed user");

        let mut captains = Vec::new();
        for (n, lat) in CAPTAIN_LATITUDES.into_iter().enumerate() {
            let captain = store
                .insert_captain(
                    &NewCaptain {
                        name: format!("Captain {n}"),
                        vehicle: format!("scooter KA-01-{n:04}"),
                    },
                    now,
                )
                .await
                .expect("seed captain");
            store
                .update_captain_location(captain.id, point((lat, SHOP_LOCATION.1)), now)
                .await
                .expect("place captain");
            let captain = store
                .set_captain_availability(captain.id, CaptainAvailability::Available)
                .await
                .expect("captain online");
            captains.push(captain);
        }

        let (state, worker) = AppState::new(test_config(overrides), Arc::clone(&store));
        Self {
            state,
            store,
            worker,
            shop,
            user,
            captains,
        }
    }

    /// The HTTP router, without rate limiting.
    #[must_use]
    pub fn router(&self) -> Router {
        routes::router(self.state.clone(), None)
    }

    /// A bearer token for `principal`.
    ///
    /// # Panics
    ///
    /// Panics if signing fails.
    #[must_use]
    pub fn token(&self, principal: Principal) -> String {
        self.state
            .signer()
            .issue(principal, std::time::Duration::from_secs(3600))
            .expect("sign token")
    }

    #[must_use]
    pub fn user_principal(&self) -> Principal {
        Principal::user(self.user.id)
    }

    #[must_use]
    pub fn shop_principal(&self) -> Principal {
        Principal::shop(self.shop.id)
    }

    /// # Panics
    ///
    /// Panics if fewer than `n + 1` captains were seeded.
    #[must_use]
    pub fn captain_principal(&self, n: usize) -> Principal {
        Principal::captain(self.captains.get(n).expect("seeded captain").id)
    }

    /// Send one request through the router and decode the JSON body
    /// (`Value::Null` for empty or non-JSON bodies).
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be built or the body cannot be read.
    pub async fn call(
        &self,
        method: Method,
        path: &str,
        principal: Option<Principal>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(principal) = principal {
            builder = builder.header(
                header::AUTHORIZATION,
                format!("Bearer {}", self.token(principal)),
            );
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("build request");

        let response = self.router().oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Deliver every queued notification now.
    pub async fn flush(&mut self) {
        self.worker.drain().await;
    }
}

/// Build a [`GeoPoint`] from a literal pair.
///
/// # Panics
///
/// Panics for out-of-range coordinates.
#[must_use]
pub fn point((lat, lng): (f64, f64)) -> GeoPoint {
    GeoPoint::new(lat, lng).expect("valid coordinates")
}

/// A cash-on-delivery order body for the seeded shop: two dosas at 120.00.
#[must_use]
pub fn order_body(app: &TestApp) -> Value {
    json!({
        "shop_id": app.shop.id,
        "items": [{ "name": "masala dosa", "unit_price": "120.00", "quantity": 2 }],
        "dropoff": { "lat": DROPOFF.0, "lng": DROPOFF.1 },
        "address": "12 MG Road, Bengaluru",
        "payment_method": "cash_on_delivery"
    })
}
