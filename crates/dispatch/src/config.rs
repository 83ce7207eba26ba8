//! Dispatch service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `DISPATCH_TOKEN_SECRET` - Bearer token signing secret (min 32 chars, high entropy)
//! - `DISPATCH_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`; not needed with `DISPATCH_STORE=memory`)
//!
//! ## Optional
//! - `DISPATCH_HOST` - Bind address (default: 127.0.0.1)
//! - `DISPATCH_PORT` - Listen port (default: 3000)
//! - `DISPATCH_STORE` - `postgres` or `memory` (default: postgres)
//! - `DISPATCH_RADII_KM` - Search radii tried in order (default: 3,5,8)
//! - `DISPATCH_MAX_OFFERS` - Captains offered per round (default: 5)
//! - `DISPATCH_OFFER_TIMEOUT_SECS` - Wait before a round is retried (default: 45)
//! - `DISPATCH_MAX_ROUNDS` - Rounds before a ride expires (default: 3)
//! - `DISPATCH_SWEEP_INTERVAL_SECS` - Stale ride sweep period (default: 15)
//! - `DISPATCH_LOCATION_FRESHNESS_SECS` - Max captain location age (default: 300)
//! - `DISPATCH_MAX_OTP_ATTEMPTS` - Wrong OTPs before lockout (default: 5)
//! - `DISPATCH_AUTO` - Dispatch new and reopened rides in the background
//!   (default: true)
//! - `NOTIFY_MAX_ATTEMPTS` - Delivery attempts per recipient (default: 4)
//! - `NOTIFY_BASE_DELAY_MS` - First retry delay cap (default: 200)
//! - `NOTIFY_MAX_DELAY_MS` - Retry delay cap (default: 2000)
//! - `NOTIFY_QUEUE_CAPACITY` - Outbox queue length (default: 1024)
//! - `WS_BUFFER` - Events buffered per socket (default: 64)
//! - `RATE_LIMIT_REPLENISH_SECS` - Seconds per request token on `/api`, 0
//!   disables limiting (default: 1)
//! - `RATE_LIMIT_BURST` - Requests allowed in a burst (default: 50)
//! - `FARE_BASE`, `FARE_PER_KM`, `FARE_PER_MINUTE`, `FARE_MINIMUM` - Fare
//!   schedule amounts (defaults: 20.00, 8.00, 1.00, 30.00)
//! - `FARE_ROAD_FACTOR` - Route/straight-line ratio (default: 1.3)
//! - `FARE_AVERAGE_SPEED_KMH` - Assumed speed (default: 25)
//! - `COMMISSION_SHOP_BPS` - Commission on order subtotal (default: 1000)
//! - `COMMISSION_CAPTAIN_BPS` - Commission on delivery fare (default: 2000)
//! - `LOG_FORMAT` - `text` or `json` (default: text)
//! - `SENTRY_DSN` - Sentry error tracking DSN
//! - `SENTRY_ENVIRONMENT` - Environment name (e.g., "production", "staging")
//! - `SENTRY_SAMPLE_RATE` - Error sample rate 0.0-1.0 (default: 1.0)
//! - `SENTRY_TRACES_SAMPLE_RATE` - Trace sample rate 0.0-1.0 (default: 0.1)

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use tiffin_core::{CommissionRates, FareSchedule, Money};

use crate::notify::RetryPolicy;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;
const MIN_ENTROPY_BITS_PER_CHAR: f64 = 3.3;

/// Blocklist of common placeholder patterns (case-insensitive)
const PLACEHOLDER_PATTERNS: &[&str] = &[
    "your-",
    "changeme",
    "replace",
    "placeholder",
    "example",
    "secret",
    "password",
    "xxx",
    "todo",
    "fixme",
    "insert",
    "enter-",
    "put-your",
    "add-your",
];

/// Configuration errors that can occur during loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
    #[error("Insecure secret in {0}: {1}")]
    InsecureSecret(String, String),
}

/// Where dispatch state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// `PostgreSQL` via sqlx.
    Postgres,
    /// In-process tables; state is lost on restart.
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "memory" => Ok(Self::Memory),
            other => Err(format!("expected postgres or memory, got {other}")),
        }
    }
}

/// Dispatch service configuration.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Storage backend
    pub store: StoreBackend,
    /// `PostgreSQL` database connection URL (contains password)
    pub database_url: Option<SecretString>,
    /// IP address to bind the server to
    pub host: IpAddr,
    /// Port to listen on
    pub port: u16,
    /// Bearer token signing secret
    pub token_secret: SecretString,
    /// Dispatch engine tuning
    pub dispatch: DispatchSettings,
    /// Period of the stale ride sweep
    pub sweep_interval: Duration,
    /// Outbox queue length
    pub notify_queue_capacity: usize,
    /// Events buffered per WebSocket
    pub socket_buffer: usize,
    /// Seconds to replenish one `/api` request token (0 disables limiting)
    pub rate_limit_replenish_secs: u64,
    /// `/api` burst size per client IP
    pub rate_limit_burst: u32,
    /// Emit JSON logs instead of text
    pub log_json: bool,
    /// Sentry DSN for error tracking
    pub sentry_dsn: Option<String>,
    /// Sentry environment name
    pub sentry_environment: Option<String>,
    /// Sentry error sample rate
    pub sentry_sample_rate: f32,
    /// Sentry traces sample rate
    pub sentry_traces_sample_rate: f32,
}

/// Tuning for the dispatch engine.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Search radii tried in order until candidates are found.
    pub radii_km: Vec<f64>,
    /// Captains offered a ride per round.
    pub max_offers: usize,
    /// How long a round waits for an accept before the sweeper retries.
    pub offer_timeout: Duration,
    /// Rounds before a ride expires.
    pub max_dispatch_rounds: u32,
    /// Captains whose location is older than this are not offered rides.
    pub location_freshness: Duration,
    /// Wrong OTPs tolerated before the ride locks.
    pub max_otp_attempts: u32,
    /// Start a dispatch round as soon as a ride is created or reopened.
    pub auto_dispatch: bool,
    /// Delivery fare pricing.
    pub fare: FareSchedule,
    /// Platform commission.
    pub commission: CommissionRates,
    /// Notification retry policy.
    pub retry: RetryPolicy,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            radii_km: vec![3.0, 5.0, 8.0],
            max_offers: 5,
            offer_timeout: Duration::from_secs(45),
            max_dispatch_rounds: 3,
            location_freshness: Duration::from_secs(300),
            max_otp_attempts: 5,
            auto_dispatch: true,
            fare: FareSchedule::default(),
            commission: CommissionRates::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl DispatchSettings {
    /// Check the settings are usable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidEnvVar` naming the offending variable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, msg: &str| ConfigError::InvalidEnvVar(key.to_string(), msg.to_string());

        if self.radii_km.is_empty() {
            return Err(invalid("DISPATCH_RADII_KM", "at least one radius is required"));
        }
        if self.radii_km.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(invalid("DISPATCH_RADII_KM", "radii must be positive"));
        }
        if self.radii_km.windows(2).any(|w| matches!(w, [a, b] if b <= a)) {
            return Err(invalid("DISPATCH_RADII_KM", "radii must be strictly increasing"));
        }
        if self.max_offers == 0 {
            return Err(invalid("DISPATCH_MAX_OFFERS", "must be at least 1"));
        }
        if self.max_dispatch_rounds == 0 {
            return Err(invalid("DISPATCH_MAX_ROUNDS", "must be at least 1"));
        }
        if self.max_otp_attempts == 0 {
            return Err(invalid("DISPATCH_MAX_OTP_ATTEMPTS", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("NOTIFY_MAX_ATTEMPTS", "must be at least 1"));
        }
        self.fare
            .validate()
            .map_err(|e| invalid("FARE_*", &e.to_string()))?;
        self.commission
            .validate()
            .map_err(|e| invalid("COMMISSION_*", &e.to_string()))?;
        Ok(())
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required variables are missing, invalid, or
    /// if secrets fail validation (placeholder detection, entropy check).
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// Same as [`DispatchConfig::from_env`].
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&env);

        let store: StoreBackend = env.parse_or("DISPATCH_STORE", "postgres")?;
        let database_url = env
            .get("DISPATCH_DATABASE_URL")
            .or_else(|| env.get("DATABASE_URL"))
            .map(SecretString::from);
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::MissingEnvVar("DISPATCH_DATABASE_URL".to_string()));
        }

        let host: IpAddr = env.parse_or("DISPATCH_HOST", "127.0.0.1")?;
        let port: u16 = env.parse_or("DISPATCH_PORT", "3000")?;

        let token_secret = env
            .get("DISPATCH_TOKEN_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("DISPATCH_TOKEN_SECRET".to_string()))?;
        validate_secret_strength(&token_secret, "DISPATCH_TOKEN_SECRET")?;
        let token_secret = SecretString::from(token_secret);
        validate_token_secret(&token_secret, "DISPATCH_TOKEN_SECRET")?;

        let dispatch = DispatchSettings::from_env(&env)?;
        dispatch.validate()?;

        Ok(Self {
            store,
            database_url,
            host,
            port,
            token_secret,
            dispatch,
            sweep_interval: Duration::from_secs(env.parse_or("DISPATCH_SWEEP_INTERVAL_SECS", "15")?),
            notify_queue_capacity: env.parse_or("NOTIFY_QUEUE_CAPACITY", "1024")?,
            socket_buffer: env.parse_or("WS_BUFFER", "64")?,
            rate_limit_replenish_secs: env.parse_or("RATE_LIMIT_REPLENISH_SECS", "1")?,
            rate_limit_burst: env.parse_or("RATE_LIMIT_BURST", "50")?,
            log_json: env
                .get("LOG_FORMAT")
                .is_some_and(|f| f.eq_ignore_ascii_case("json")),
            sentry_dsn: env.get("SENTRY_DSN"),
            sentry_environment: env.get("SENTRY_ENVIRONMENT"),
            sentry_sample_rate: env.parse_or("SENTRY_SAMPLE_RATE", "1.0")?,
            sentry_traces_sample_rate: env.parse_or("SENTRY_TRACES_SAMPLE_RATE", "0.1")?,
        })
    }

    /// Returns the socket address for binding the server.
    #[must_use]
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

impl DispatchSettings {
    fn from_env(env: &Env<'_>) -> Result<Self, ConfigError> {
        let radii_km = parse_radii(&env.get_or("DISPATCH_RADII_KM", "3,5,8"))
            .map_err(|e| ConfigError::InvalidEnvVar("DISPATCH_RADII_KM".to_string(), e))?;

        let fare = FareSchedule {
            base_fare: env.money_or("FARE_BASE", "20.00")?,
            per_km: env.money_or("FARE_PER_KM", "8.00")?,
            per_minute: env.money_or("FARE_PER_MINUTE", "1.00")?,
            minimum_fare: env.money_or("FARE_MINIMUM", "30.00")?,
            road_factor: env.parse_or("FARE_ROAD_FACTOR", "1.3")?,
            average_speed_kmh: env.parse_or("FARE_AVERAGE_SPEED_KMH", "25")?,
        };
        let commission = CommissionRates {
            shop_bps: env.parse_or("COMMISSION_SHOP_BPS", "1000")?,
            captain_bps: env.parse_or("COMMISSION_CAPTAIN_BPS", "2000")?,
        };
        let retry = RetryPolicy {
            max_attempts: env.parse_or("NOTIFY_MAX_ATTEMPTS", "4")?,
            base_delay: Duration::from_millis(env.parse_or("NOTIFY_BASE_DELAY_MS", "200")?),
            max_delay: Duration::from_millis(env.parse_or("NOTIFY_MAX_DELAY_MS", "2000")?),
        };

        Ok(Self {
            radii_km,
            max_offers: env.parse_or("DISPATCH_MAX_OFFERS", "5")?,
            offer_timeout: Duration::from_secs(env.parse_or("DISPATCH_OFFER_TIMEOUT_SECS", "45")?),
            max_dispatch_rounds: env.parse_or("DISPATCH_MAX_ROUNDS", "3")?,
            location_freshness: Duration::from_secs(
                env.parse_or("DISPATCH_LOCATION_FRESHNESS_SECS", "300")?,
            ),
            max_otp_attempts: env.parse_or("DISPATCH_MAX_OTP_ATTEMPTS", "5")?,
            auto_dispatch: env.parse_or("DISPATCH_AUTO", "true")?,
            fare,
            commission,
            retry,
        })
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

/// Variable source used while loading.
struct Env<'a>(&'a dyn Fn(&str) -> Option<String>);

impl Env<'_> {
    /// Get an optional variable; empty values count as unset.
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    /// Get a variable with a default value.
    fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    /// Parse a variable, falling back to `default` when unset.
    fn parse_or<T>(&self, key: &str, default: &str) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        self.get_or(key, default)
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
    }

    /// Parse a decimal amount of money.
    fn money_or(&self, key: &str, default: &str) -> Result<Money, ConfigError> {
        self.parse_or::<Decimal>(key, default).map(Money::new)
    }
}

/// Parse a comma-separated list of kilometre values.
fn parse_radii(raw: &str) -> Result<Vec<f64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f64>().map_err(|e| format!("{s}: {e}")))
        .collect()
}

/// Validate that a token secret meets minimum length requirements.
fn validate_token_secret(secret: &SecretString, var_name: &str) -> Result<(), ConfigError> {
    let value = secret.expose_secret();
    if value.len() < MIN_TOKEN_SECRET_LENGTH {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "must be at least {} characters (got {})",
                MIN_TOKEN_SECRET_LENGTH,
                value.len()
            ),
        ));
    }
    Ok(())
}

/// Calculate Shannon entropy in bits per character.
fn shannon_entropy(s: &str) -> f64 {
    if s.is_empty() {
        return 0.0;
    }

    let mut freq: HashMap<char, usize> = HashMap::new();
    for c in s.chars() {
        *freq.entry(c).or_insert(0) += 1;
    }

    #[allow(clippy::cast_precision_loss)] // String length will never exceed f64 precision
    let len = s.len() as f64;
    freq.values()
        .map(|&count| {
            #[allow(clippy::cast_precision_loss)] // Character count will never exceed f64 precision
            let p = count as f64 / len;
            -p * p.log2()
        })
        .sum()
}

/// Validate that a secret is not a placeholder and has sufficient entropy.
fn validate_secret_strength(secret: &str, var_name: &str) -> Result<(), ConfigError> {
    let lower = secret.to_lowercase();

    for pattern in PLACEHOLDER_PATTERNS {
        if lower.contains(pattern) {
            return Err(ConfigError::InsecureSecret(
                var_name.to_string(),
                format!("appears to be a placeholder (contains '{pattern}')"),
            ));
        }
    }

    let entropy = shannon_entropy(secret);
    if entropy < MIN_ENTROPY_BITS_PER_CHAR {
        return Err(ConfigError::InsecureSecret(
            var_name.to_string(),
            format!(
                "entropy too low ({entropy:.2} bits/char, need >= {MIN_ENTROPY_BITS_PER_CHAR:.1}). Use a randomly generated secret."
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GOOD_SECRET: &str = "aB3$xY9!mK2@nL5#pQ7&rT0*uW4^zC6";

    fn load(vars: &[(&str, &str)]) -> Result<DispatchConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        DispatchConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_shannon_entropy_empty() {
        assert!((shannon_entropy("") - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shannon_entropy_two_chars() {
        // "ab" has entropy of 1 bit per char (50% a, 50% b)
        let entropy = shannon_entropy("ab");
        assert!((entropy - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_validate_secret_strength_placeholder() {
        let result = validate_secret_strength("your-token-key-here", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_secret_strength_low_entropy() {
        let result = validate_secret_strength("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "TEST_VAR");
        assert!(matches!(result, Err(ConfigError::InsecureSecret(_, _))));
    }

    #[test]
    fn test_validate_token_secret_too_short() {
        let secret = SecretString::from("aB3$xY9!");
        assert!(validate_token_secret(&secret, "TEST_TOKEN").is_err());
    }

    #[test]
    fn test_defaults_with_memory_store() {
        let config = load(&[
            ("DISPATCH_STORE", "memory"),
            ("DISPATCH_TOKEN_SECRET", GOOD_SECRET),
        ])
        .unwrap();
        assert_eq!(config.store, StoreBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:3000");
        assert_eq!(config.dispatch, DispatchSettings::default());
        assert_eq!(config.sweep_interval, Duration::from_secs(15));
        assert_eq!(config.rate_limit_replenish_secs, 1);
        assert_eq!(config.rate_limit_burst, 50);
    }

    #[test]
    fn test_postgres_requires_database_url() {
        let result = load(&[("DISPATCH_TOKEN_SECRET", GOOD_SECRET)]);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(_))));

        let config = load(&[
            ("DISPATCH_TOKEN_SECRET", GOOD_SECRET),
            ("DATABASE_URL", "postgres://localhost/tiffin"),
        ])
        .unwrap();
        assert_eq!(config.store, StoreBackend::Postgres);
        assert!(config.database_url.is_some());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("DISPATCH_STORE", "memory"),
            ("DISPATCH_TOKEN_SECRET", GOOD_SECRET),
            ("DISPATCH_RADII_KM", "2, 4.5 ,10"),
            ("DISPATCH_MAX_OFFERS", "3"),
            ("FARE_PER_KM", "9.50"),
            ("COMMISSION_CAPTAIN_BPS", "1500"),
            ("NOTIFY_MAX_DELAY_MS", "500"),
        ])
        .unwrap();
        assert_eq!(config.dispatch.radii_km, vec![2.0, 4.5, 10.0]);
        assert_eq!(config.dispatch.max_offers, 3);
        assert_eq!(config.dispatch.fare.per_km, Money::from_cents(950));
        assert_eq!(config.dispatch.commission.captain_bps, 1_500);
        assert_eq!(config.dispatch.retry.max_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_rejects_bad_tuning() {
        for (key, value) in [
            ("DISPATCH_RADII_KM", "5,3"),
            ("DISPATCH_RADII_KM", "0"),
            ("DISPATCH_RADII_KM", "three"),
            ("DISPATCH_MAX_OFFERS", "0"),
            ("COMMISSION_SHOP_BPS", "10001"),
            ("FARE_ROAD_FACTOR", "0.5"),
            ("DISPATCH_PORT", "70000"),
        ] {
            let result = load(&[
                ("DISPATCH_STORE", "memory"),
                ("DISPATCH_TOKEN_SECRET", GOOD_SECRET),
                (key, value),
            ]);
            assert!(
                matches!(result, Err(ConfigError::InvalidEnvVar(_, _))),
                "{key}={value}"
            );
        }
    }

    #[test]
    fn test_config_debug_redacts_secrets() {
        let config = load(&[
            ("DISPATCH_TOKEN_SECRET", GOOD_SECRET),
            ("DISPATCH_DATABASE_URL", "postgres://tiffin:hunter2@db/tiffin"),
        ])
        .unwrap();
        let debug_output = format!("{config:?}");
        assert!(!debug_output.contains(GOOD_SECRET));
        assert!(!debug_output.contains("hunter2"));
    }
}
