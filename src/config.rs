//! Settings & account context (C1).
//!
//! Immutable per-process configuration resolved once at startup from the
//! environment, the way the teacher's `Config::from_env` resolves
//! `models::Config` — except unlike that helper, which silently falls back
//! to a default on every missing key, the required Flex/store keys here
//! abort startup with every missing key named in one message.

use chrono_tz::Tz;
use std::time::Duration;

/// The process's fixed local business zone. Not configurable: `spec.md`
/// §1 pins it to Asia/Jerusalem.
pub const LOCAL_BUSINESS_ZONE: Tz = chrono_tz::Asia::Jerusalem;

/// The process's fixed base (functional) currency.
pub const BASE_CURRENCY: &str = "USD";

#[derive(Debug, Clone)]
pub struct RetryTuning {
    pub initial_wait: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub jitter_min_multiplier: f64,
    pub jitter_max_multiplier: f64,
}

impl Default for RetryTuning {
    fn default() -> Self {
        Self {
            initial_wait: Duration::from_secs(5),
            max_attempts: 7,
            backoff_base: Duration::from_secs(10),
            backoff_max: Duration::from_secs(60),
            jitter_min_multiplier: 0.5,
            jitter_max_multiplier: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub account_id: String,
    pub flex_token: String,
    pub flex_query_id: String,
    pub database_url: String,
    pub retry: RetryTuning,
}

#[derive(Debug, thiserror::Error)]
#[error("configuration invalid, missing required settings: {0:?}")]
pub struct ConfigError(pub Vec<&'static str>);

impl Settings {
    /// Resolve settings from the environment, loading a `.env` file first
    /// the way the teacher's `main.rs` calls `dotenv::dotenv()` before
    /// reading any variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut missing = Vec::new();
        let account_id = require_var("ACCOUNT_ID", &mut missing);
        let flex_token = require_var("IBKR_FLEX_TOKEN", &mut missing);
        let flex_query_id = require_var("IBKR_FLEX_QUERY_ID", &mut missing);
        let database_url = require_var("DATABASE_URL", &mut missing);

        if !missing.is_empty() {
            return Err(ConfigError(missing));
        }

        let retry = RetryTuning {
            initial_wait: Duration::from_secs(parse_env_or(
                "IBKR_FLEX_INITIAL_WAIT_SECONDS",
                5,
            )),
            max_attempts: parse_env_or("IBKR_FLEX_RETRY_ATTEMPTS", 7),
            backoff_base: Duration::from_secs(parse_env_or(
                "IBKR_FLEX_BACKOFF_BASE_SECONDS",
                10,
            )),
            backoff_max: Duration::from_secs(parse_env_or("IBKR_FLEX_BACKOFF_MAX_SECONDS", 60)),
            jitter_min_multiplier: parse_env_or("IBKR_FLEX_JITTER_MIN_MULTIPLIER", 0.5),
            jitter_max_multiplier: parse_env_or("IBKR_FLEX_JITTER_MAX_MULTIPLIER", 1.5),
        };

        Ok(Self {
            account_id: account_id.unwrap(),
            flex_token: flex_token.unwrap(),
            flex_query_id: flex_query_id.unwrap(),
            database_url: database_url.unwrap(),
            retry,
        })
    }
}

fn require_var(key: &'static str, missing: &mut Vec<&'static str>) -> Option<String> {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Some(v),
        _ => {
            missing.push(key);
            None
        }
    }
}

/// Parse a tunable numeric env var, falling back to `default` (with a
/// warning) on absence or parse failure — mirrors the teacher's
/// `env::var(..).ok().and_then(|v| v.parse().ok()).unwrap_or(default)`
/// idiom in `main.rs`'s `DataSourceKillSwitch::new`.
fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw, "invalid value for tuning var, using default");
            default
        }),
        Err(_) => default,
    }
}
