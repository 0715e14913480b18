//! # Configuration
//!
//! The console boots from a JSON payload rendered by the web tier:
//!
//! ```json
//! {
//!   "config": { "baseUrl": "https://console.example.com", "csrfToken": "abc" },
//!   "providers": [
//!     { "id": "compute:ORD", "service_type": "compute", "service_name": "cloudServers", "service_region": "ORD" }
//!   ]
//! }
//! ```
//!
//! Every `config` key is optional. Environment variables override the
//! payload, which lets the same bootstrap file drive staging and local runs.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

pub const BOOTSTRAP_ENV: &str = "CONSOLE_BOOTSTRAP";
pub const BASE_URL_ENV: &str = "CONSOLE_BASE_URL";
pub const CSRF_TOKEN_ENV: &str = "CONSOLE_CSRF_TOKEN";
pub const POLL_INTERVAL_ENV: &str = "CONSOLE_POLL_INTERVAL_SECS";
pub const FETCH_TIMEOUT_ENV: &str = "CONSOLE_FETCH_TIMEOUT_MS";
pub const RETRIES_ENV: &str = "CONSOLE_RETRIES";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConsoleConfig {
    pub base_url: String,
    pub csrf_token: Option<String>,
    pub poll_interval_secs: u64,
    pub fetch_timeout_ms: u64,
    pub slow_timeout_ms: u64,
    /// Extra attempts after a timeout.
    pub retries: u32,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            csrf_token: None,
            poll_interval_secs: 60,
            fetch_timeout_ms: 15_000,
            slow_timeout_ms: 30_000,
            retries: 0,
        }
    }
}

impl ConsoleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn slow_timeout(&self) -> Duration {
        Duration::from_millis(self.slow_timeout_ms)
    }

    /// Applies overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Applies overrides from any lookup, so tests need not touch the
    /// process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(BASE_URL_ENV) {
            self.base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(token) = lookup(CSRF_TOKEN_ENV) {
            self.csrf_token = Some(token);
        }
        if let Some(value) = lookup(POLL_INTERVAL_ENV) {
            self.poll_interval_secs = parse_override(POLL_INTERVAL_ENV, value)?;
        }
        if let Some(value) = lookup(FETCH_TIMEOUT_ENV) {
            self.fetch_timeout_ms = parse_override(FETCH_TIMEOUT_ENV, value)?;
        }
        if let Some(value) = lookup(RETRIES_ENV) {
            self.retries = parse_override(RETRIES_ENV, value)?;
        }
        Ok(())
    }
}

fn parse_override<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride { key, value })
}

/// The payload the console starts from.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Bootstrap {
    #[serde(default)]
    pub config: ConsoleConfig,
    /// Raw provider records; see [`Providers`](crate::provider::Providers).
    #[serde(default)]
    pub providers: Vec<Value>,
}

impl Bootstrap {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn missing_keys_take_defaults() {
        let bootstrap = Bootstrap::from_json(r#"{"config": {"baseUrl": "https://c"}}"#).unwrap();
        assert_eq!(bootstrap.config.base_url, "https://c");
        assert_eq!(bootstrap.config.poll_interval(), Duration::from_secs(60));
        assert_eq!(bootstrap.config.fetch_timeout(), Duration::from_secs(15));
        assert!(bootstrap.providers.is_empty());
    }

    #[test]
    fn overrides_win_over_payload() {
        let env: HashMap<&str, &str> = HashMap::from([
            (BASE_URL_ENV, "https://staging/"),
            (POLL_INTERVAL_ENV, "5"),
            (RETRIES_ENV, "2"),
        ]);
        let mut config = ConsoleConfig::default();
        config
            .apply_overrides(|key| env.get(key).map(|value| value.to_string()))
            .unwrap();

        assert_eq!(config.base_url, "https://staging");
        assert_eq!(config.poll_interval_secs, 5);
        assert_eq!(config.retries, 2);
        assert_eq!(config.csrf_token, None);
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = ConsoleConfig::default();
        let error = config
            .apply_overrides(|key| (key == FETCH_TIMEOUT_ENV).then(|| "soon".to_string()))
            .unwrap_err();
        assert!(matches!(
            error,
            ConfigError::InvalidOverride { key: FETCH_TIMEOUT_ENV, .. }
        ));
    }

    #[test]
    fn malformed_payload_is_a_parse_error() {
        assert!(matches!(Bootstrap::from_json("{"), Err(ConfigError::Parse(_))));
    }
}
