//! Error types for the session layer.
//!
//! Connectivity blips are deliberately NOT errors here: they surface as
//! [`SessionEvent`](crate::session::SessionEvent) notifications, because
//! disconnects and reconnects are expected steady-state behavior. The
//! variants below cover the cases a caller can actually act on.

use crate::config::ConfigError;
use crate::session::SessionState;
use thiserror::Error;

/// Errors returned by session operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),

    #[error("No connection acknowledgment within {0} ms")]
    ConnectTimeout(u64),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Not connected - current state: {state:?}")]
    NotConnected { state: SessionState },

    #[error("Session terminated - construct a fresh session to reconnect")]
    Terminated,

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Error type returned by subscription callbacks.
///
/// A callback returning `Err` is logged and isolated per handler; it never
/// affects sibling handlers or the dispatch loop.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            SessionError::InvalidBrokerUrl("not-a-url".to_string()),
            SessionError::ConnectTimeout(4000),
            SessionError::ConnectionFailed("broker refused".to_string()),
            SessionError::NotConnected {
                state: SessionState::Disconnected,
            },
            SessionError::Terminated,
        ];

        for error in errors {
            assert!(!error.to_string().is_empty());
        }
    }

    #[test]
    fn test_not_connected_carries_state() {
        let error = SessionError::NotConnected {
            state: SessionState::Reconnecting(3),
        };
        assert!(error.to_string().contains("Reconnecting(3)"));
    }

    #[test]
    fn test_connect_timeout_mentions_window() {
        let error = SessionError::ConnectTimeout(250);
        assert!(error.to_string().contains("250"));
    }
}
