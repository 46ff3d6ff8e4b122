//! Inbound frame routing and payload codecs.
//!
//! Raw transport events are routed to a small set of outcomes the event
//! loop cares about; publish frames are decoded once and fanned out to
//! every callback registered for the exact topic. Frames for unknown
//! topics are dropped silently - the broker may deliver residual messages
//! for a topic whose local unsubscribe raced an in-flight ack.

use super::registry::SubscriptionRegistry;
use rumqttc::v5::Event;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

/// Decoded inbound payload handed to subscription callbacks
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// Payload parsed as JSON
    Json(Value),
    /// Raw text, delivered unchanged when JSON decoding fails
    Text(String),
}

impl InboundPayload {
    /// Decode a raw payload, falling back to text.
    ///
    /// Decoding must never cause message loss: anything that is not valid
    /// JSON is delivered as (lossy UTF-8) text.
    pub fn decode(raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw);
        match serde_json::from_str::<Value>(&text) {
            Ok(value) => InboundPayload::Json(value),
            Err(_) => InboundPayload::Text(text.into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            InboundPayload::Json(value) => Some(value),
            InboundPayload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            InboundPayload::Json(_) => None,
            InboundPayload::Text(text) => Some(text),
        }
    }
}

/// Outbound message body accepted by the publish path
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundPayload {
    /// Structured data, serialized to canonical JSON text on send
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

impl OutboundPayload {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            // Serializing a Value cannot fail: map keys are always strings
            OutboundPayload::Json(value) => serde_json::to_vec(&value).unwrap_or_default(),
            OutboundPayload::Text(text) => text.into_bytes(),
            OutboundPayload::Bytes(bytes) => bytes,
        }
    }
}

impl From<Value> for OutboundPayload {
    fn from(value: Value) -> Self {
        OutboundPayload::Json(value)
    }
}

impl From<String> for OutboundPayload {
    fn from(text: String) -> Self {
        OutboundPayload::Text(text)
    }
}

impl From<&str> for OutboundPayload {
    fn from(text: &str) -> Self {
        OutboundPayload::Text(text.to_string())
    }
}

impl From<Vec<u8>> for OutboundPayload {
    fn from(bytes: Vec<u8>) -> Self {
        OutboundPayload::Bytes(bytes)
    }
}

impl From<&[u8]> for OutboundPayload {
    fn from(bytes: &[u8]) -> Self {
        OutboundPayload::Bytes(bytes.to_vec())
    }
}

/// Routing decision for a raw transport event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Connection acknowledged - ready to publish/subscribe
    ConnAck,
    /// Publish frame received on a subscribed (or residual) topic
    Frame { topic: String, payload: Vec<u8> },
    /// The broker ended the connection
    LinkLost,
    /// Keep-alive, ack or outgoing traffic; nothing to do
    Ignored,
}

/// Route a transport event to the outcome the event loop acts on
pub fn route_event(event: &Event) -> EventRoute {
    use rumqttc::v5::mqttbytes::v5::Packet;
    match event {
        Event::Incoming(incoming) => match incoming {
            Packet::ConnAck(_) => EventRoute::ConnAck,
            Packet::Publish(publish) => EventRoute::Frame {
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload.to_vec(),
            },
            Packet::Disconnect(_) => EventRoute::LinkLost,
            other => {
                trace!(packet = ?other, "transport event ignored");
                EventRoute::Ignored
            }
        },
        Event::Outgoing(_) => EventRoute::Ignored,
    }
}

/// Deliver a raw frame to every callback registered for its topic.
///
/// Returns the number of callbacks invoked. Callbacks run in registration
/// order; a failing callback is logged and does not stop delivery to the
/// others. The registry lock is released before any callback runs, so
/// callbacks may themselves subscribe or unsubscribe.
pub async fn dispatch(
    registry: &Mutex<SubscriptionRegistry>,
    topic: &str,
    raw: &[u8],
) -> usize {
    let callbacks = registry.lock().await.callbacks_for(topic);
    if callbacks.is_empty() {
        debug!(topic, "frame for topic without handlers dropped");
        return 0;
    }

    let payload = InboundPayload::decode(raw);
    for callback in &callbacks {
        if let Err(error) = callback(topic, &payload) {
            warn!(topic, error = %error, "subscription callback failed");
        }
    }
    callbacks.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::connection::QosLevel;
    use bytes::Bytes;
    use rumqttc::v5::mqttbytes::v5::{Packet, Publish};
    use rumqttc::v5::mqttbytes::QoS;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_decode_json_payload() {
        let payload = InboundPayload::decode(br#"{"v":21.5}"#);
        assert_eq!(payload, InboundPayload::Json(json!({"v": 21.5})));
    }

    #[test]
    fn test_decode_falls_back_to_text() {
        let payload = InboundPayload::decode(b"ON");
        assert_eq!(payload, InboundPayload::Text("ON".to_string()));
        assert!(payload.as_json().is_none());
        assert_eq!(payload.as_text(), Some("ON"));
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy_text() {
        let payload = InboundPayload::decode(&[0xff, 0xfe, b'x']);
        assert!(matches!(payload, InboundPayload::Text(_)));
    }

    #[test]
    fn test_outbound_json_serializes_to_text() {
        let payload: OutboundPayload = json!({"brightness": 128}).into();
        assert_eq!(payload.into_bytes(), br#"{"brightness":128}"#.to_vec());
    }

    #[test]
    fn test_outbound_text_and_bytes_pass_through() {
        let text: OutboundPayload = "plain".into();
        assert_eq!(text.into_bytes(), b"plain".to_vec());

        let bytes: OutboundPayload = vec![0x01, 0x02].into();
        assert_eq!(bytes.into_bytes(), vec![0x01, 0x02]);
    }

    #[test]
    fn test_route_conn_ack() {
        use rumqttc::v5::mqttbytes::v5::{ConnAck, ConnectReturnCode};
        let event = Event::Incoming(Packet::ConnAck(ConnAck {
            session_present: false,
            code: ConnectReturnCode::Success,
            properties: None,
        }));
        assert_eq!(route_event(&event), EventRoute::ConnAck);
    }

    #[test]
    fn test_route_publish_frame() {
        let event = Event::Incoming(Packet::Publish(Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain: false,
            topic: Bytes::from("sensors/temp"),
            pkid: 0,
            payload: Bytes::from(r#"{"v":21.5}"#),
            properties: None,
        }));

        match route_event(&event) {
            EventRoute::Frame { topic, payload } => {
                assert_eq!(topic, "sensors/temp");
                assert_eq!(payload, br#"{"v":21.5}"#.to_vec());
            }
            other => panic!("expected Frame route, got {other:?}"),
        }
    }

    #[test]
    fn test_route_disconnect() {
        use rumqttc::v5::mqttbytes::v5::{Disconnect, DisconnectReasonCode};
        let event = Event::Incoming(Packet::Disconnect(Disconnect {
            reason_code: DisconnectReasonCode::NormalDisconnection,
            properties: None,
        }));
        assert_eq!(route_event(&event), EventRoute::LinkLost);
    }

    #[tokio::test]
    async fn test_dispatch_fans_out_in_order() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for id in ["first", "second"] {
            let order = Arc::clone(&order);
            registry.lock().await.add(
                "sensors/temp",
                QosLevel::AtMostOnce,
                Arc::new(move |_, payload| {
                    order
                        .lock()
                        .unwrap()
                        .push((id, payload.as_json().cloned()));
                    Ok(())
                }),
            );
        }

        let delivered = dispatch(&registry, "sensors/temp", br#"{"v":21.5}"#).await;
        assert_eq!(delivered, 2);

        let seen = order.lock().unwrap();
        assert_eq!(
            *seen,
            vec![
                ("first", Some(json!({"v": 21.5}))),
                ("second", Some(json!({"v": 21.5}))),
            ]
        );
    }

    #[tokio::test]
    async fn test_dispatch_unknown_topic_is_dropped() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let delivered = dispatch(&registry, "never/subscribed", b"payload").await;
        assert_eq!(delivered, 0);
    }

    #[tokio::test]
    async fn test_failing_callback_does_not_stop_siblings() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let invoked = Arc::new(AtomicUsize::new(0));

        {
            let mut guard = registry.lock().await;
            guard.add(
                "a",
                QosLevel::AtMostOnce,
                Arc::new(|_, _| Err("consumer exploded".into())),
            );
            let invoked = Arc::clone(&invoked);
            guard.add(
                "a",
                QosLevel::AtMostOnce,
                Arc::new(move |_, _| {
                    invoked.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
        }

        let delivered = dispatch(&registry, "a", b"x").await;
        assert_eq!(delivered, 2);
        assert_eq!(invoked.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dispatch_after_partial_unsubscribe() {
        let registry = Mutex::new(SubscriptionRegistry::new());
        let h1_count = Arc::new(AtomicUsize::new(0));
        let h2_count = Arc::new(AtomicUsize::new(0));

        let h1 = {
            let mut guard = registry.lock().await;
            let h1_count = Arc::clone(&h1_count);
            let (h1, _) = guard.add(
                "a",
                QosLevel::AtMostOnce,
                Arc::new(move |_, _| {
                    h1_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
            let h2_count = Arc::clone(&h2_count);
            guard.add(
                "a",
                QosLevel::AtMostOnce,
                Arc::new(move |_, _| {
                    h2_count.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
            h1
        };

        let emptied = registry.lock().await.remove(&h1);
        assert!(!emptied, "h2 still registered, wire unsubscribe not due");

        let delivered = dispatch(&registry, "a", b"x").await;
        assert_eq!(delivered, 1);
        assert_eq!(h1_count.load(Ordering::SeqCst), 0);
        assert_eq!(h2_count.load(Ordering::SeqCst), 1);
    }
}
