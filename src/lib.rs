//! mqtt-session - persistent MQTT session layer
//!
//! A thin but non-trivial session/multiplexing layer above `rumqttc`:
//! one long-lived broker connection, many logical subscriptions, bounded
//! automatic reconnection, and in-order dispatch of inbound messages to
//! registered callbacks.
//!
//! # Overview
//!
//! - Connect/reconnect lifecycle as an explicit state machine
//!   ([`SessionState`]), with transitions surfaced as [`SessionEvent`]
//!   notifications rather than errors
//! - Topic-based multiplexing: any number of callbacks per topic, each
//!   individually removable via its [`SubscriptionHandle`]; exactly one
//!   protocol-level subscription per live topic
//! - Reconnects bounded by a configurable ceiling (default 5); exceeding
//!   it terminates the session and emits [`SessionEvent::GiveUp`]
//! - JSON payloads decoded automatically, with raw-text fallback so
//!   decoding never loses a message
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use mqtt_session::{MqttSession, QosLevel, SessionConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let session = MqttSession::new(SessionConfig::new("mqtt://localhost:1883"))?;
//! session.connect().await?;
//!
//! session
//!     .subscribe(
//!         "alerts",
//!         QosLevel::AtLeastOnce,
//!         Arc::new(|topic, payload| {
//!             println!("{topic}: {payload:?}");
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod session;

pub use config::{ConfigError, SessionConfig};
pub use error::{HandlerError, SessionError, SessionResult};
pub use session::{
    InboundPayload, MessageCallback, MqttSession, OutboundPayload, QosLevel, ReconnectPolicy,
    Session, SessionEvent, SessionState, SubscriptionHandle,
};
