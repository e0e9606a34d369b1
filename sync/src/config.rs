//! Configuration management for the sync coordinator.

use std::env;
use std::time::Duration;
use tidepool_engine::DEFAULT_ID_FIELD;

/// Sync configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the remote collection resource
    pub remote_url: Option<String>,
    /// Name of the bound store
    pub store_name: String,
    /// Identifier field of the bound store
    pub id_field: String,
    /// Maximum concurrent saves during a pass
    pub max_in_flight: usize,
    /// Per-request timeout for the REST channel
    pub request_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote_url: None,
            store_name: "records".to_string(),
            id_field: DEFAULT_ID_FIELD.to_string(),
            max_in_flight: 4,
            request_timeout: Duration::from_millis(10_000),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let remote_url = lookup("TIDEPOOL_REMOTE_URL").map(|url| url.trim_end_matches('/').to_string());

        let store_name = lookup("TIDEPOOL_STORE_NAME").unwrap_or(defaults.store_name);

        let id_field = lookup("TIDEPOOL_ID_FIELD").unwrap_or(defaults.id_field);
        if id_field.is_empty() {
            return Err(ConfigError::EmptyIdField);
        }

        let max_in_flight = match lookup("TIDEPOOL_MAX_IN_FLIGHT") {
            Some(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n >= 1)
                .ok_or(ConfigError::InvalidMaxInFlight)?,
            None => defaults.max_in_flight,
        };

        let request_timeout = match lookup("TIDEPOOL_REQUEST_TIMEOUT_MS") {
            Some(raw) => raw
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| ConfigError::InvalidTimeout)?,
            None => defaults.request_timeout,
        };

        Ok(Self {
            remote_url,
            store_name,
            id_field,
            max_in_flight,
            request_timeout,
        })
    }

    /// The remote URL, required by the REST channel.
    pub fn require_remote_url(&self) -> Result<&str, ConfigError> {
        self.remote_url
            .as_deref()
            .ok_or(ConfigError::MissingRemoteUrl)
    }

    pub fn with_remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("TIDEPOOL_REMOTE_URL environment variable is required")]
    MissingRemoteUrl,

    #[error("TIDEPOOL_ID_FIELD must not be empty")]
    EmptyIdField,

    #[error("Invalid TIDEPOOL_MAX_IN_FLIGHT value (expected an integer >= 1)")]
    InvalidMaxInFlight,

    #[error("Invalid TIDEPOOL_REQUEST_TIMEOUT_MS value")]
    InvalidTimeout,
}
