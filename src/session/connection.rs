//! Pure connection state management for the session layer.
//!
//! This module contains the session state machine, the reconnect policy,
//! and the pure function that turns a [`SessionConfig`] into transport
//! options. No I/O happens here.

use crate::config::SessionConfig;
use crate::error::SessionError;
use rumqttc::v5::{mqttbytes::QoS, MqttOptions};
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;
use uuid::Uuid;

/// Lifecycle state of the session
///
/// `Terminated` is absorbing: once a session reaches it (explicit close or
/// reconnect ceiling exceeded), a fresh session must be constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No connection attempt has been made yet
    Disconnected,
    /// Connection attempt in flight, waiting for acknowledgment
    Connecting,
    /// Connected and ready for subscribe/publish
    Connected,
    /// Link lost, automatic reconnect in progress (attempt count)
    Reconnecting(u32),
    /// Closed for good - explicit close or reconnect ceiling exceeded
    Terminated,
}

impl SessionState {
    /// Whether subscribe/publish operations are accepted in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }

    /// Whether this state can never be left again
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminated)
    }
}

/// Quality-of-service level requested for a publish or subscribe.
///
/// Forwarded opaquely to the transport; this crate attaches no delivery
/// semantics of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QosLevel {
    #[default]
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

impl QosLevel {
    /// Map a numeric QoS (0, 1, 2) to a level
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(QosLevel::AtMostOnce),
            1 => Some(QosLevel::AtLeastOnce),
            2 => Some(QosLevel::ExactlyOnce),
            _ => None,
        }
    }

    pub(crate) fn to_wire(self) -> QoS {
        match self {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Bounds on automatic reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive attempts tolerated before the session terminates
    pub max_attempts: u32,
    /// Delay between attempts
    pub reconnect_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            max_attempts: 5,
            reconnect_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&SessionConfig> for ReconnectPolicy {
    fn from(config: &SessionConfig) -> Self {
        ReconnectPolicy {
            max_attempts: config.max_reconnect_attempts,
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
        }
    }
}

/// Derive a collision-resistant client id from the configured prefix.
///
/// A fresh id is generated per connection attempt so a reconnecting session
/// never conflicts with its own half-dead predecessor on the broker.
pub fn derive_client_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4().simple())
}

/// Pure function to build transport options from config.
///
/// Used for the initial connection and for every reconnect attempt, so both
/// paths agree on TLS, credentials, and keep-alive.
pub fn configure_mqtt_options(config: &SessionConfig) -> Result<MqttOptions, SessionError> {
    let url = Url::parse(&config.broker_url)
        .map_err(|_| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;

    let host = url
        .host_str()
        .ok_or_else(|| SessionError::InvalidBrokerUrl(config.broker_url.clone()))?;
    let port = url
        .port()
        .unwrap_or(if url.scheme() == "mqtts" { 8883 } else { 1883 });

    let client_id = derive_client_id(&config.client_id_prefix);
    let mut mqtt_options = MqttOptions::new(client_id, host, port);

    if url.scheme() == "mqtts" {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(username) = config.username() {
        let password = config.password().unwrap_or_default();
        mqtt_options.set_credentials(username, password);
    }

    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_start(config.clean_session);

    Ok(mqtt_options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_state_predicates() {
        assert!(SessionState::Connected.is_connected());
        assert!(!SessionState::Connecting.is_connected());
        assert!(!SessionState::Reconnecting(2).is_connected());
        assert!(!SessionState::Terminated.is_connected());

        assert!(SessionState::Terminated.is_terminal());
        assert!(!SessionState::Disconnected.is_terminal());
    }

    #[test]
    fn test_qos_level_from_u8() {
        assert_eq!(QosLevel::from_u8(0), Some(QosLevel::AtMostOnce));
        assert_eq!(QosLevel::from_u8(1), Some(QosLevel::AtLeastOnce));
        assert_eq!(QosLevel::from_u8(2), Some(QosLevel::ExactlyOnce));
        assert_eq!(QosLevel::from_u8(3), None);
    }

    #[test]
    fn test_qos_level_wire_mapping() {
        assert_eq!(QosLevel::AtMostOnce.to_wire(), QoS::AtMostOnce);
        assert_eq!(QosLevel::AtLeastOnce.to_wire(), QoS::AtLeastOnce);
        assert_eq!(QosLevel::ExactlyOnce.to_wire(), QoS::ExactlyOnce);
    }

    #[test]
    fn test_reconnect_policy_default() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.reconnect_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_reconnect_policy_from_config() {
        let mut config = SessionConfig::new("mqtt://localhost:1883");
        config.max_reconnect_attempts = 3;
        config.reconnect_interval_ms = 250;

        let policy = ReconnectPolicy::from(&config);
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.reconnect_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_derive_client_id_uses_prefix_and_is_unique() {
        let a = derive_client_id("dash");
        let b = derive_client_id("dash");
        assert!(a.starts_with("dash-"));
        assert!(b.starts_with("dash-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_configure_mqtt_options() {
        let config = SessionConfig::new("mqtt://localhost:1883");
        assert!(configure_mqtt_options(&config).is_ok());
    }

    #[test]
    fn test_configure_mqtt_options_tls() {
        let config = SessionConfig::new("mqtts://broker.example.com");
        assert!(configure_mqtt_options(&config).is_ok());
    }

    #[test]
    fn test_invalid_broker_url() {
        let config = SessionConfig::new("not a url");
        let result = configure_mqtt_options(&config);
        assert!(matches!(result, Err(SessionError::InvalidBrokerUrl(_))));
    }
}
