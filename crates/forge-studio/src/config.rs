//! Configuration for the studio.
//!
//! Configuration is loaded from environment variables with sensible defaults.

use forge_core::{SessionConfig, SnapshotConfig, DEFAULT_ENTRY_PATH};
use std::time::Duration;

/// Default generation backend.
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000";

/// Configuration for a [`Studio`](crate::Studio).
#[derive(Debug, Clone, PartialEq)]
pub struct StudioConfig {
    /// Base URL of the generation backend.
    pub api_url: String,

    /// Limit on a single backend request (default: 60s).
    pub request_timeout: Duration,

    /// Wait after a source write before capturing a snapshot (default: 6s).
    pub settle_delay: Duration,

    /// Extra wait when no preview is showing yet (default: 5s).
    pub grace_delay: Duration,

    /// Sandbox path generated source is written to.
    pub entry_path: String,
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} has invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("api url must start with http:// or https://: {0}")]
    InvalidApiUrl(String),

    #[error("request timeout must be > 0")]
    ZeroTimeout,

    #[error("entry path is required")]
    MissingEntryPath,
}

impl Default for StudioConfig {
    fn default() -> Self {
        let snapshot = SnapshotConfig::default();
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(60),
            settle_delay: snapshot.settle_delay,
            grace_delay: snapshot.grace_delay,
            entry_path: DEFAULT_ENTRY_PATH.to_string(),
        }
    }
}

impl StudioConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FORGE_API_URL` | `http://127.0.0.1:8000` |
    /// | `FORGE_REQUEST_TIMEOUT_SECS` | `60` |
    /// | `FORGE_SETTLE_DELAY_MS` | `6000` |
    /// | `FORGE_GRACE_DELAY_MS` | `5000` |
    /// | `FORGE_ENTRY_PATH` | `/src/App.tsx` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default = Self::default();

        let number = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidValue { var, value }),
            }
        };

        Ok(Self {
            api_url: lookup("FORGE_API_URL").unwrap_or(default.api_url),
            request_timeout: number("FORGE_REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(default.request_timeout),
            settle_delay: number("FORGE_SETTLE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default.settle_delay),
            grace_delay: number("FORGE_GRACE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(default.grace_delay),
            entry_path: lookup("FORGE_ENTRY_PATH").unwrap_or(default.entry_path),
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.api_url.starts_with("http://") || self.api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidApiUrl(self.api_url.clone()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.entry_path.trim_start_matches('/').is_empty() {
            return Err(ConfigError::MissingEntryPath);
        }
        Ok(())
    }

    /// Backend endpoint URL for `path`.
    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_url.trim_end_matches('/'), path)
    }

    /// Session configuration derived from this config.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            entry_path: self.entry_path.clone(),
            ..SessionConfig::default()
        }
    }

    /// Snapshot configuration derived from this config.
    pub fn snapshot_config(&self) -> SnapshotConfig {
        SnapshotConfig {
            settle_delay: self.settle_delay,
            grace_delay: self.grace_delay,
            ..SnapshotConfig::default()
        }
    }
}
