//! Client configuration.
//!
//! ```toml
//! enabled = true
//! base_url = "ws://127.0.0.1:8090/save"
//! load_timeout_secs = 10
//! retry_interval_secs = 5
//! ```

use crate::ConfigError;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Settings for one persistence backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// When false the facade drops saves and answers every load with
    /// "not found", without touching the network.
    pub enabled: bool,
    /// WebSocket endpoint; the player identity is appended as `?id=`.
    pub base_url: String,
    /// Default bound for a load, connection wait included.
    pub load_timeout_secs: f64,
    /// Gap between reconnect attempts, and between retry-queue resends.
    pub retry_interval_secs: f64,
    /// Bound on the WebSocket handshake.
    pub connect_timeout_secs: f64,
    /// Period of the built-in ticker task.
    pub tick_interval_ms: u64,
    /// Maximum queued envelopes; `None` keeps every failed send.
    pub retry_queue_capacity: Option<usize>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "ws://127.0.0.1:8090/save".to_string(),
            load_timeout_secs: 10.0,
            retry_interval_secs: 5.0,
            connect_timeout_secs: 10.0,
            tick_interval_ms: 250,
            retry_queue_capacity: None,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// A config that turns the facade into a no-op.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.base_url.starts_with("ws://") || self.base_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid(format!(
                "base_url must start with ws:// or wss://, got {:?}",
                self.base_url
            )));
        }
        for (name, value) in [
            ("load_timeout_secs", self.load_timeout_secs),
            ("retry_interval_secs", self.retry_interval_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be a positive number of seconds, got {value}"
                )));
            }
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.retry_queue_capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "retry_queue_capacity must be greater than zero when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_timeout(&self) -> Duration {
        secs(self.load_timeout_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        secs(self.retry_interval_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        secs(self.connect_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SyncConfig::default();
        config.validate().unwrap();
        assert!(config.enabled);
        assert_eq!(config.load_timeout(), Duration::from_secs(10));
        assert_eq!(config.retry_interval(), Duration::from_secs(5));
    }

    #[test]
    fn parse_partial_toml() {
        let config = SyncConfig::from_toml_str(
            r#"
            base_url = "wss://saves.example.com/ws"
            retry_interval_secs = 2.5
            retry_queue_capacity = 64
            "#,
        )
        .unwrap();
        assert_eq!(config.base_url, "wss://saves.example.com/ws");
        assert_eq!(config.retry_interval(), Duration::from_millis(2500));
        assert_eq!(config.retry_queue_capacity, Some(64));
        assert_eq!(config.load_timeout_secs, 10.0);
    }

    #[test]
    fn parse_disabled() {
        let config = SyncConfig::from_toml_str("enabled = false").unwrap();
        assert!(!config.enabled);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            SyncConfig::from_toml_str(r#"base_url = "http://example.com""#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("retry_interval_secs = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            SyncConfig::from_toml_str("retry_queue_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(matches!(
            SyncConfig::from_toml_str("retry_intervall_secs = 3"),
            Err(ConfigError::Parse(_))
        ));
    }
}
