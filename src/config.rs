//! Configuration for the MQTT session layer.
//!
//! Configuration is loaded from a TOML file (or built in code) and carries
//! everything needed to establish and maintain the broker connection.
//! Credentials are never stored in the file: the config names environment
//! variables and the values are resolved when connection options are built.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Connection settings for a single broker session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// Broker URL with scheme and optional port (`mqtt://` or `mqtts://`)
    pub broker_url: String,
    /// Prefix used to derive a collision-resistant per-session client id
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
    /// Discard broker-side subscription state from a prior session
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Fail `connect()` if no acknowledgment arrives within this window
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Delay between automatic reconnect attempts
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    /// Consecutive reconnect attempts tolerated before the session gives up
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// MQTT keep-alive interval in seconds
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    /// Environment variable containing the broker username
    pub username_env: Option<String>,
    /// Environment variable containing the broker password
    pub password_env: Option<String>,
}

fn default_client_id_prefix() -> String {
    "session".to_string()
}

fn default_clean_session() -> bool {
    true
}

fn default_connect_timeout_ms() -> u64 {
    4000
}

fn default_reconnect_interval_ms() -> u64 {
    1000
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_keep_alive_secs() -> u64 {
    60
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionConfig {
    /// Create a configuration for the given broker with all defaults applied
    pub fn new(broker_url: impl Into<String>) -> Self {
        SessionConfig {
            broker_url: broker_url.into(),
            client_id_prefix: default_client_id_prefix(),
            clean_session: default_clean_session(),
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            keep_alive_secs: default_keep_alive_secs(),
            username_env: None,
            password_env: None,
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: SessionConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_reconnect_attempts == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_reconnect_attempts must be greater than 0".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.client_id_prefix.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "client_id_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the broker username from its environment variable
    pub fn username(&self) -> Option<String> {
        Self::env_var_optional(self.username_env.as_ref())
    }

    /// Get the broker password from its environment variable
    pub fn password(&self) -> Option<String> {
        Self::env_var_optional(self.password_env.as_ref())
    }

    fn env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::new("mqtt://localhost:1883");
        assert_eq!(config.client_id_prefix, "session");
        assert!(config.clean_session);
        assert_eq!(config.connect_timeout_ms, 4000);
        assert_eq!(config.reconnect_interval_ms, 1000);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.keep_alive_secs, 60);
        assert!(config.username_env.is_none());
    }

    #[test]
    fn test_load_from_file_applies_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"broker_url = "mqtt://broker.example.com:1883""#).unwrap();

        let config = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.broker_url, "mqtt://broker.example.com:1883");
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.connect_timeout_ms, 4000);
    }

    #[test]
    fn test_load_from_file_full() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
broker_url = "mqtts://broker.example.com"
client_id_prefix = "dash"
clean_session = false
connect_timeout_ms = 2500
reconnect_interval_ms = 500
max_reconnect_attempts = 3
keep_alive_secs = 30
username_env = "MQTT_USER"
password_env = "MQTT_PASS"
"#
        )
        .unwrap();

        let config = SessionConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.client_id_prefix, "dash");
        assert!(!config.clean_session);
        assert_eq!(config.connect_timeout_ms, 2500);
        assert_eq!(config.reconnect_interval_ms, 500);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.username_env.as_deref(), Some("MQTT_USER"));
    }

    #[test]
    fn test_load_from_file_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "broker_url = [not toml").unwrap();

        let result = SessionConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::TomlParse(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let mut config = SessionConfig::new("mqtt://localhost:1883");
        config.max_reconnect_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_prefix() {
        let mut config = SessionConfig::new("mqtt://localhost:1883");
        config.client_id_prefix = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        unsafe {
            std::env::set_var("SESSION_TEST_USER", "alice");
        }
        let mut config = SessionConfig::new("mqtt://localhost:1883");
        config.username_env = Some("SESSION_TEST_USER".to_string());
        config.password_env = Some("SESSION_TEST_PASS_UNSET".to_string());

        assert_eq!(config.username().as_deref(), Some("alice"));
        assert_eq!(config.password(), None);

        unsafe {
            std::env::remove_var("SESSION_TEST_USER");
        }
    }
}
