//! Configuration management for the client.

use std::env;
use std::time::Duration;

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Upper bound on a single remote write or delete
    pub write_timeout: Duration,
    /// Simulated round trip of the in-memory remote
    pub remote_latency: Duration,
    /// How long to wait for the initial sync to finish
    pub ready_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_millis(10_000),
            remote_latency: Duration::ZERO,
            ready_timeout: Duration::from_millis(5_000),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            write_timeout: millis(&lookup, "TETHER_WRITE_TIMEOUT_MS", defaults.write_timeout)?,
            remote_latency: millis(&lookup, "TETHER_REMOTE_LATENCY_MS", defaults.remote_latency)?,
            ready_timeout: millis(&lookup, "TETHER_READY_TIMEOUT_MS", defaults.ready_timeout)?,
        })
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid {name} value: {value:?}")]
    InvalidNumber { name: &'static str, value: String },
}
