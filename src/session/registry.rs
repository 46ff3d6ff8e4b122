//! Topic subscription registry.
//!
//! Maps each topic to an ordered list of caller-supplied callbacks and
//! decides when a protocol-level subscribe or unsubscribe is due: only the
//! first handler for a topic triggers a wire subscribe, and only removing
//! the last one triggers a wire unsubscribe. The registry itself performs
//! no I/O; [`add`](SubscriptionRegistry::add) and
//! [`remove`](SubscriptionRegistry::remove) report whether a wire call is
//! owed and the session client issues it.
//!
//! Handlers are addressed by explicit tokens handed out at subscribe time,
//! not by callback identity - comparing closures for equality is not a
//! thing in Rust, and an opaque handle survives cloning and moving.

use super::connection::QosLevel;
use super::dispatcher::InboundPayload;
use crate::error::HandlerError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Caller-supplied callback invoked for every message on a subscribed topic.
///
/// Receives the topic and the decoded payload. A returned `Err` is logged
/// and isolated per handler.
pub type MessageCallback = Arc<dyn Fn(&str, &InboundPayload) -> Result<(), HandlerError> + Send + Sync>;

/// Opaque handle identifying one registered callback on one topic.
///
/// Returned by `subscribe`; required to later remove exactly that callback.
/// Subscribing the same callback twice yields two independent handles, and
/// both must be removed to stop delivery entirely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    topic: String,
    token: u64,
}

impl SubscriptionHandle {
    /// Topic this handle is registered on
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
struct HandlerEntry {
    token: u64,
    qos: QosLevel,
    callback: MessageCallback,
}

/// Topic -> ordered handler list, with wire-call decisions
#[derive(Default)]
pub struct SubscriptionRegistry {
    next_token: u64,
    topics: HashMap<String, Vec<HandlerEntry>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for a topic.
    ///
    /// Returns the handle and `true` if this is the topic's first handler,
    /// i.e. a wire subscribe is due.
    pub fn add(
        &mut self,
        topic: &str,
        qos: QosLevel,
        callback: MessageCallback,
    ) -> (SubscriptionHandle, bool) {
        self.next_token += 1;
        let token = self.next_token;

        let entries = self.topics.entry(topic.to_string()).or_default();
        let first = entries.is_empty();
        entries.push(HandlerEntry {
            token,
            qos,
            callback,
        });

        (
            SubscriptionHandle {
                topic: topic.to_string(),
                token,
            },
            first,
        )
    }

    /// Remove the callback identified by `handle`.
    ///
    /// Returns `true` if the topic's handler list became empty, i.e. a wire
    /// unsubscribe is due. Unknown or already-removed handles are a no-op.
    pub fn remove(&mut self, handle: &SubscriptionHandle) -> bool {
        let Some(entries) = self.topics.get_mut(&handle.topic) else {
            return false;
        };
        let Some(position) = entries.iter().position(|e| e.token == handle.token) else {
            return false;
        };
        entries.remove(position);

        if entries.is_empty() {
            self.topics.remove(&handle.topic);
            true
        } else {
            false
        }
    }

    /// Remove every callback for a topic.
    ///
    /// Returns `true` if the topic had any handlers, i.e. a wire
    /// unsubscribe is due. An absent topic is a no-op.
    pub fn remove_topic(&mut self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    /// Callbacks for a topic in registration order (exact match only)
    pub fn callbacks_for(&self, topic: &str) -> Vec<MessageCallback> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.callback)).collect())
            .unwrap_or_default()
    }

    /// Number of live handlers for a topic
    pub fn handler_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }

    /// Read-only enumeration of subscribed topics
    pub fn topics_snapshot(&self) -> HashSet<String> {
        self.topics.keys().cloned().collect()
    }

    /// Wire subscriptions to replay after a reconnect.
    ///
    /// One entry per live topic, carrying the QoS the topic was first
    /// subscribed with.
    pub fn wire_subscriptions(&self) -> Vec<(String, QosLevel)> {
        self.topics
            .iter()
            .filter_map(|(topic, entries)| {
                entries.first().map(|e| (topic.clone(), e.qos))
            })
            .collect()
    }

    /// Drop every registration
    pub fn clear(&mut self) {
        self.topics.clear();
    }
}
