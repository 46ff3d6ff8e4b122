//! Persistent broker session with subscription multiplexing.
//!
//! One physical MQTT connection carries many logical subscriptions. The
//! module is split into focused sub-modules, pure logic separate from I/O:
//!
//! - [`connection`] - session state machine, reconnect policy, option building
//! - [`supervisor`] - reconnect counting and the give-up ceiling
//! - [`registry`] - topic -> handler multiplexing and wire-call decisions
//! - [`dispatcher`] - payload decode and fan-out
//! - [`client`] - the impure core owning the transport and event loop
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_session::{MqttSession, QosLevel, SessionConfig};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let config = SessionConfig::new("mqtt://localhost:1883");
//! let session = MqttSession::new(config)?;
//! session.connect().await?;
//!
//! let handle = session
//!     .subscribe(
//!         "sensors/temp",
//!         QosLevel::AtMostOnce,
//!         Arc::new(|topic, payload| {
//!             println!("{topic}: {payload:?}");
//!             Ok(())
//!         }),
//!     )
//!     .await?;
//!
//! session.publish("sensors/temp", r#"{"v":21.5}"#, QosLevel::AtMostOnce, false).await;
//!
//! session.unsubscribe(&handle).await;
//! session.disconnect().await;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod dispatcher;
pub mod registry;
pub mod supervisor;

pub use client::MqttSession;
pub use connection::{QosLevel, ReconnectPolicy, SessionState};
pub use dispatcher::{EventRoute, InboundPayload, OutboundPayload};
pub use registry::{MessageCallback, SubscriptionHandle, SubscriptionRegistry};
pub use supervisor::{ReconnectSupervisor, SessionEvent, SupervisorVerdict};

use crate::error::SessionResult;

/// Caller-facing session contract.
///
/// Abstracts the concrete [`MqttSession`] so consumers can take a session
/// by trait object and tests can substitute a double.
#[async_trait::async_trait]
pub trait Session: Send + Sync {
    /// Connect to the broker and wait for the acknowledgment
    async fn connect(&self) -> SessionResult<()>;

    /// Close the session for good (absorbing)
    async fn disconnect(&self);

    /// Register a callback for a topic; rejected while offline
    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        callback: MessageCallback,
    ) -> SessionResult<SubscriptionHandle>;

    /// Remove one registered callback
    async fn unsubscribe(&self, handle: &SubscriptionHandle);

    /// Remove every callback for a topic
    async fn unsubscribe_topic(&self, topic: &str);

    /// Publish a message; `false` when not connected or not accepted
    async fn publish(
        &self,
        topic: &str,
        payload: OutboundPayload,
        qos: QosLevel,
        retain: bool,
    ) -> bool;

    /// Whether the session is currently connected
    fn is_connected(&self) -> bool;

    /// Current lifecycle state
    fn session_state(&self) -> SessionState;
}
