//! HTTP middleware stack for the dispatch API.
//!
//! # Middleware Order (outermost first)
//!
//! 1. Sentry layers (hub per request, HTTP transaction)
//! 2. `TraceLayer` (request tracing)
//! 3. Request ID (add unique ID to each request)
//! 4. Rate limiting on `/api` (governor)
//!
//! Authentication is per handler through the extractors in [`auth`].

pub mod auth;
pub mod rate_limit;
pub mod request_id;

pub use auth::{Authenticated, RequireCaptain, RequireShop, RequireUser};
pub use rate_limit::{RateLimiterLayer, api_rate_limiter};
pub use request_id::request_id_middleware;
