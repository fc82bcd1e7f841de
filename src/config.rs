//! Client configuration.
//!
//! Defaults suit a local backend. `from_env` reads a `.env` file (shared with
//! the webview as `VITE_*` variables) and `CIPHERBOX_*` overrides.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} must be a whole number of seconds, got {value:?}")]
    InvalidSeconds { var: String, value: String },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
}

/// Timeouts, intervals and endpoints for the request layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub api_base_url: String,
    /// Fixed timeout on every outbound API request.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Timeout for the health probe, shorter than `request_timeout`.
    pub health_timeout: Duration,
    /// Minimum gap between two non-forced probes.
    pub probe_debounce: Duration,
    /// Interval of the probe loop while the server is unreachable.
    pub probe_interval: Duration,
    /// Default response cache TTL.
    pub cache_ttl: Duration,
    pub health_path: String,
    pub refresh_path: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:3000".to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            health_timeout: Duration::from_secs(5),
            probe_debounce: Duration::from_secs(5),
            probe_interval: Duration::from_secs(30),
            cache_ttl: crate::cache::DEFAULT_TTL,
            health_path: crate::connectivity::health::HEALTH_PATH.to_string(),
            refresh_path: "/auth/refresh".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load `.env` (if present) and apply environment overrides.
    ///
    /// API base URL: CIPHERBOX_API_URL > VITE_API_URL > localhost default.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env from the app root (parent of the binary's crate).
        let _ = dotenvy::from_filename("../.env");
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup("CIPHERBOX_API_URL").or_else(|| lookup("VITE_API_URL")) {
            config.api_base_url = url;
        }

        let seconds = |var: &str, target: &mut Duration| -> Result<(), ConfigError> {
            if let Some(value) = lookup(var) {
                let secs = value
                    .trim()
                    .parse::<u64>()
                    .map_err(|_| ConfigError::InvalidSeconds {
                        var: var.to_string(),
                        value: value.clone(),
                    })?;
                *target = Duration::from_secs(secs);
            }
            Ok(())
        };

        seconds("CIPHERBOX_REQUEST_TIMEOUT_SECS", &mut config.request_timeout)?;
        seconds("CIPHERBOX_HEALTH_TIMEOUT_SECS", &mut config.health_timeout)?;
        seconds("CIPHERBOX_PROBE_INTERVAL_SECS", &mut config.probe_interval)?;
        seconds("CIPHERBOX_CACHE_TTL_SECS", &mut config.cache_ttl)?;

        config.validate()?;
        Ok(config)
    }

    /// Reject durations that would stall requests or the probe loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("request_timeout", self.request_timeout),
            ("health_timeout", self.health_timeout),
            ("probe_interval", self.probe_interval),
        ];
        match required.into_iter().find(|(_, value)| value.is_zero()) {
            Some((field, _)) => Err(ConfigError::ZeroDuration { field }),
            None => Ok(()),
        }
    }
}
