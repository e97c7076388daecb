//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Upper bound for a note lifetime, whether requested or defaulted: 30 days.
pub const MAX_TTL_HOURS: i64 = 720;

/// Retry budget for flushing a session's content before it is evicted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff: Duration::from_millis(200),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` runs the server against the in-memory repository.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub client_url: String,
    pub note_ttl_hours: i64,
    pub flush_interval: Duration,
    pub flush_policy: FlushPolicy,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:5030".parse::<SocketAddr>())?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let client_url =
            lookup("CLIENT_URL").unwrap_or_else(|| "http://localhost:5173".to_string());

        // --- Note and Session Settings ---
        let note_ttl_hours: i64 = parse_or(&lookup, "NOTE_TTL_HOURS", Ok(24))?;
        if !(1..=MAX_TTL_HOURS).contains(&note_ttl_hours) {
            return Err(ConfigError::InvalidValue(
                "NOTE_TTL_HOURS".to_string(),
                format!("must be between 1 and {}", MAX_TTL_HOURS),
            ));
        }

        let flush_interval_secs: u64 = parse_or(&lookup, "FLUSH_INTERVAL_SECS", Ok(10))?;
        if flush_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_INTERVAL_SECS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let defaults = FlushPolicy::default();
        let max_attempts: u32 = parse_or(&lookup, "FLUSH_MAX_ATTEMPTS", Ok(defaults.max_attempts))?;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "FLUSH_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let backoff_ms: u64 = parse_or(
            &lookup,
            "FLUSH_BACKOFF_MS",
            Ok(defaults.base_backoff.as_millis() as u64),
        )?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            client_url,
            note_ttl_hours,
            flush_interval: Duration::from_secs(flush_interval_secs),
            flush_policy: FlushPolicy {
                max_attempts,
                base_backoff: Duration::from_millis(backoff_ms),
            },
        })
    }
}

/// Parses `key` when present, otherwise falls back to `default`.
fn parse_or<F, T>(
    lookup: &F,
    key: &str,
    default: Result<T, <T as FromStr>::Err>,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
    }
}
