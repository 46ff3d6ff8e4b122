//! Impure I/O for the session layer.
//!
//! [`MqttSession`] owns the single physical broker connection and the
//! spawned event loop task that drives it. Everything stateful flows
//! through here: lifecycle transitions via a `watch` channel, lifecycle
//! notifications via a `broadcast` channel, and subscription state behind
//! one mutex shared with the event loop.

use super::connection::{self, QosLevel, ReconnectPolicy, SessionState};
use super::dispatcher::{self, EventRoute, OutboundPayload};
use super::registry::{MessageCallback, SubscriptionHandle, SubscriptionRegistry};
use super::supervisor::{ReconnectSupervisor, SessionEvent, SupervisorVerdict};
use super::Session;
use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use rumqttc::v5::{AsyncClient, EventLoop};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the transport request channel
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Capacity of the lifecycle event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// How long `disconnect()` waits for the event loop task to stop
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A persistent session over one broker connection.
///
/// Explicitly constructed and explicitly owned - there is no ambient global
/// instance. Dropping the session aborts its event loop; call
/// [`disconnect`](MqttSession::disconnect) for a graceful shutdown.
pub struct MqttSession {
    config: SessionConfig,
    client: Arc<Mutex<Option<AsyncClient>>>,
    registry: Arc<Mutex<SubscriptionRegistry>>,
    state_tx: watch::Sender<SessionState>,
    state_rx: watch::Receiver<SessionState>,
    event_tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl MqttSession {
    /// Create a session for the given broker.
    ///
    /// Validates the configuration eagerly; no I/O happens until
    /// [`connect`](MqttSession::connect).
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        // Surface a bad URL or bad config at construction, not mid-connect
        connection::configure_mqtt_options(&config)?;

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(MqttSession {
            config,
            client: Arc::new(Mutex::new(None)),
            registry: Arc::new(Mutex::new(SubscriptionRegistry::new())),
            state_tx,
            state_rx,
            event_tx,
            shutdown_tx,
            shutdown_rx,
            loop_handle: Mutex::new(None),
        })
    }

    /// Connect to the broker and wait for the acknowledgment.
    ///
    /// Idempotent: while `Connecting` or `Reconnecting` this joins the
    /// in-flight attempt instead of opening a second physical connection,
    /// and while `Connected` it returns immediately. A terminated session
    /// cannot be revived - construct a fresh one.
    ///
    /// Failure is reported both ways: as the returned error and as a
    /// [`SessionEvent::Error`] for observers of [`events`](MqttSession::events).
    pub async fn connect(&self) -> SessionResult<()> {
        let timeout = Duration::from_millis(self.config.connect_timeout_ms);

        {
            let mut handle_guard = self.loop_handle.lock().await;
            // Clone the state out first: holding the watch read guard across
            // an await would block the event loop's state updates
            let state = self.state_rx.borrow().clone();
            match state {
                SessionState::Connected => return Ok(()),
                SessionState::Connecting | SessionState::Reconnecting(_) => {
                    drop(handle_guard);
                    return self.await_connection_ack(timeout).await;
                }
                SessionState::Terminated => return Err(SessionError::Terminated),
                SessionState::Disconnected => {}
            }

            let options = connection::configure_mqtt_options(&self.config)?;
            let (async_client, event_loop) =
                AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
            *self.client.lock().await = Some(async_client);
            let _ = self.state_tx.send(SessionState::Connecting);

            let task = tokio::spawn(Self::run_event_loop(
                event_loop,
                Arc::clone(&self.client),
                Arc::clone(&self.registry),
                self.config.clone(),
                self.state_tx.clone(),
                self.event_tx.clone(),
                self.shutdown_rx.clone(),
            ));
            *handle_guard = Some(task);
        }

        let result = self.await_connection_ack(timeout).await;
        if let Err(e) = &result {
            let _ = self.event_tx.send(SessionEvent::Error(e.to_string()));
        }
        result
    }

    async fn await_connection_ack(&self, timeout: Duration) -> SessionResult<()> {
        Self::wait_for_connection_ack(self.state_rx.clone(), timeout).await
    }

    /// Wait until the state machine reports `Connected` or a terminal outcome
    async fn wait_for_connection_ack(
        mut state_rx: watch::Receiver<SessionState>,
        timeout: Duration,
    ) -> SessionResult<()> {
        let timeout_ms = timeout.as_millis() as u64;
        let outcome = tokio::time::timeout(timeout, async {
            loop {
                match state_rx.borrow_and_update().clone() {
                    SessionState::Connected => return Ok(()),
                    SessionState::Terminated => return Err(SessionError::Terminated),
                    SessionState::Disconnected
                    | SessionState::Connecting
                    | SessionState::Reconnecting(_) => {}
                }
                if state_rx.changed().await.is_err() {
                    return Err(SessionError::ConnectionFailed(
                        "state channel closed".to_string(),
                    ));
                }
            }
        })
        .await;

        match outcome {
            Ok(result) => result,
            Err(_) => Err(SessionError::ConnectTimeout(timeout_ms)),
        }
    }

    /// Event loop: polls the transport, dispatches frames, supervises
    /// reconnection, and stops on shutdown or when the ceiling is reached.
    async fn run_event_loop(
        event_loop: EventLoop,
        client: Arc<Mutex<Option<AsyncClient>>>,
        registry: Arc<Mutex<SubscriptionRegistry>>,
        config: SessionConfig,
        state_tx: watch::Sender<SessionState>,
        event_tx: broadcast::Sender<SessionEvent>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut supervisor = ReconnectSupervisor::new(ReconnectPolicy::from(&config));
        let mut current_event_loop = event_loop;
        debug!(broker = %config.broker_url, "session event loop started");

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("shutdown signal received, stopping session loop");
                        break;
                    }
                }

                polled = current_event_loop.poll() => {
                    match polled {
                        Ok(event) => match dispatcher::route_event(&event) {
                            EventRoute::ConnAck => {
                                supervisor.on_connected();
                                let _ = state_tx.send(SessionState::Connected);
                                let _ = event_tx.send(SessionEvent::Connected);
                                info!(broker = %config.broker_url, "connected to broker");
                                Self::resubscribe_all(&client, &registry).await;
                            }
                            EventRoute::Frame { topic, payload } => {
                                let delivered =
                                    dispatcher::dispatch(&registry, &topic, &payload).await;
                                debug!(topic, delivered, "inbound frame dispatched");
                            }
                            EventRoute::LinkLost => {
                                let _ = event_tx.send(SessionEvent::Error(
                                    "broker closed the connection".to_string(),
                                ));
                                if !Self::handle_link_loss(
                                    &mut supervisor,
                                    &client,
                                    &config,
                                    &mut current_event_loop,
                                    &state_tx,
                                    &event_tx,
                                    &shutdown_rx,
                                )
                                .await
                                {
                                    break;
                                }
                            }
                            EventRoute::Ignored => {}
                        },
                        Err(e) => {
                            warn!(error = %e, "transport error");
                            let _ = event_tx.send(SessionEvent::Error(e.to_string()));
                            if !Self::handle_link_loss(
                                &mut supervisor,
                                &client,
                                &config,
                                &mut current_event_loop,
                                &state_tx,
                                &event_tx,
                                &shutdown_rx,
                            )
                            .await
                            {
                                break;
                            }
                        }
                    }
                }
            }
        }
        debug!("session event loop stopped");
    }

    /// React to a lost link. Returns `false` when the loop should stop.
    async fn handle_link_loss(
        supervisor: &mut ReconnectSupervisor,
        client: &Arc<Mutex<Option<AsyncClient>>>,
        config: &SessionConfig,
        current_event_loop: &mut EventLoop,
        state_tx: &watch::Sender<SessionState>,
        event_tx: &broadcast::Sender<SessionEvent>,
        shutdown_rx: &watch::Receiver<bool>,
    ) -> bool {
        if *shutdown_rx.borrow() {
            return false;
        }

        match supervisor.on_link_lost() {
            SupervisorVerdict::Retry { attempt, delay } => {
                let _ = state_tx.send(SessionState::Reconnecting(attempt));
                let _ = event_tx.send(SessionEvent::Reconnecting(attempt));
                info!(
                    attempt,
                    max = config.max_reconnect_attempts,
                    "reconnecting to broker"
                );

                if !Self::interruptible_sleep(shutdown_rx.clone(), delay).await {
                    return false;
                }
                if *shutdown_rx.borrow() {
                    return false;
                }

                match connection::configure_mqtt_options(config) {
                    Ok(options) => {
                        let (new_client, new_event_loop) =
                            AsyncClient::new(options, REQUEST_CHANNEL_CAPACITY);
                        *current_event_loop = new_event_loop;
                        *client.lock().await = Some(new_client);
                        true
                    }
                    Err(e) => {
                        // Config was valid at construction; keep retrying
                        error!(error = %e, "failed to rebuild connection options");
                        true
                    }
                }
            }
            SupervisorVerdict::GiveUp { attempts } => {
                let _ = event_tx.send(SessionEvent::Reconnecting(attempts));
                warn!(attempts, "reconnect ceiling reached, giving up");
                let _ = state_tx.send(SessionState::Terminated);
                let _ = event_tx.send(SessionEvent::GiveUp);
                if let Some(old_client) = client.lock().await.take() {
                    let _ = old_client.disconnect().await;
                }
                false
            }
        }
    }

    /// Sleep that wakes early on shutdown. Returns `false` if shutdown was
    /// requested during the wait.
    async fn interruptible_sleep(
        mut shutdown_rx: watch::Receiver<bool>,
        delay: Duration,
    ) -> bool {
        tokio::select! {
            _ = shutdown_rx.changed() => !*shutdown_rx.borrow(),
            _ = tokio::time::sleep(delay) => true,
        }
    }

    /// Replay every live wire subscription after a (re)connect.
    ///
    /// Clean-start sessions lose broker-side subscription state on
    /// reconnect; the registry is authoritative, so it is pushed back out.
    async fn resubscribe_all(
        client: &Arc<Mutex<Option<AsyncClient>>>,
        registry: &Arc<Mutex<SubscriptionRegistry>>,
    ) {
        let wire_subs = registry.lock().await.wire_subscriptions();
        if wire_subs.is_empty() {
            return;
        }

        let guard = client.lock().await;
        let Some(client) = guard.as_ref() else {
            return;
        };
        for (topic, qos) in wire_subs {
            if let Err(e) = client.subscribe(&topic, qos.to_wire()).await {
                warn!(topic, error = %e, "re-subscribe failed");
            } else {
                debug!(topic, "re-subscribed");
            }
        }
    }

    /// Register a callback for a topic.
    ///
    /// Rejected with [`SessionError::NotConnected`] while offline -
    /// subscriptions are not queued. The first handler for a topic issues
    /// the protocol-level subscribe; further handlers on the same topic
    /// piggyback on it. Subscribing the same callback twice yields two
    /// independent registrations, both delivered to until both are removed.
    pub async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        callback: MessageCallback,
    ) -> SessionResult<SubscriptionHandle> {
        let state = self.state_rx.borrow().clone();
        if !state.is_connected() {
            return Err(SessionError::NotConnected { state });
        }

        let (handle, first) = self.registry.lock().await.add(topic, qos, callback);
        if first {
            self.subscribe_on_wire(topic, qos).await;
        }
        Ok(handle)
    }

    /// Remove one registered callback.
    ///
    /// Sibling callbacks on the same topic are untouched; the protocol
    /// unsubscribe is issued only when the last one is removed. Stale
    /// handles are a no-op.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        let emptied = self.registry.lock().await.remove(handle);
        if emptied {
            self.unsubscribe_on_wire(handle.topic()).await;
        }
    }

    /// Remove every callback for a topic and unsubscribe on the wire.
    ///
    /// A topic with no registered callbacks is a no-op, not an error.
    pub async fn unsubscribe_topic(&self, topic: &str) {
        let existed = self.registry.lock().await.remove_topic(topic);
        if existed {
            self.unsubscribe_on_wire(topic).await;
        }
    }

    /// Fire-and-forget protocol subscribe; failures are logged, never
    /// propagated - the local registry stays authoritative for dispatch.
    async fn subscribe_on_wire(&self, topic: &str, qos: QosLevel) {
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return;
        };
        if let Err(e) = client.subscribe(topic, qos.to_wire()).await {
            warn!(topic, error = %e, "wire subscribe failed");
        } else {
            debug!(topic, "wire subscribe issued");
        }
    }

    async fn unsubscribe_on_wire(&self, topic: &str) {
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return;
        };
        if let Err(e) = client.unsubscribe(topic).await {
            warn!(topic, error = %e, "wire unsubscribe failed");
        } else {
            debug!(topic, "wire unsubscribe issued");
        }
    }

    /// Publish a message.
    ///
    /// Returns `false` without touching the network when not connected.
    /// `true` means the frame was accepted for transmission - it is NOT a
    /// delivery acknowledgment.
    pub async fn publish(
        &self,
        topic: &str,
        payload: impl Into<OutboundPayload>,
        qos: QosLevel,
        retain: bool,
    ) -> bool {
        let state = self.state_rx.borrow().clone();
        if !state.is_connected() {
            debug!(topic, state = ?state, "publish rejected while offline");
            return false;
        }

        let bytes = payload.into().into_bytes();
        let guard = self.client.lock().await;
        let Some(client) = guard.as_ref() else {
            return false;
        };
        match client.publish(topic, qos.to_wire(), retain, bytes).await {
            Ok(()) => true,
            Err(e) => {
                warn!(topic, error = %e, "publish handoff failed");
                false
            }
        }
    }

    /// Close the session for good.
    ///
    /// Releases the physical connection on every path, transitions to the
    /// absorbing `Terminated` state, clears the registry, and unblocks any
    /// caller waiting in [`connect`](MqttSession::connect). Safe to call
    /// repeatedly and from any state.
    pub async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.disconnect().await {
                debug!(error = %e, "transport disconnect failed");
            }
        }

        self.registry.lock().await.clear();

        let already_terminated = self.state_rx.borrow().is_terminal();
        let _ = self.state_tx.send(SessionState::Terminated);
        if !already_terminated {
            let _ = self.event_tx.send(SessionEvent::Closed);
        }

        if let Some(handle) = self.loop_handle.lock().await.take() {
            let abort_handle = handle.abort_handle();
            match tokio::time::timeout(SHUTDOWN_GRACE, handle).await {
                Ok(Ok(())) => debug!("session loop shut down cleanly"),
                Ok(Err(e)) if !e.is_cancelled() => {
                    warn!(error = %e, "session loop ended with error");
                }
                Err(_) => {
                    warn!("session loop did not stop in time, aborting");
                    abort_handle.abort();
                }
                _ => {}
            }
        }

        info!("session disconnected");
    }

    /// Current lifecycle state (point-in-time snapshot)
    pub fn session_state(&self) -> SessionState {
        self.state_rx.borrow().clone()
    }

    /// Whether the session is currently connected
    pub fn is_connected(&self) -> bool {
        self.session_state().is_connected()
    }

    /// Subscribe to lifecycle notifications.
    ///
    /// Each call returns an independent receiver; events published before
    /// the call are not replayed.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Topics with at least one live handler (diagnostics)
    pub async fn topics_snapshot(&self) -> HashSet<String> {
        self.registry.lock().await.topics_snapshot()
    }

    /// The configuration this session was built from
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[async_trait]
impl Session for MqttSession {
    async fn connect(&self) -> SessionResult<()> {
        MqttSession::connect(self).await
    }

    async fn disconnect(&self) {
        MqttSession::disconnect(self).await;
    }

    async fn subscribe(
        &self,
        topic: &str,
        qos: QosLevel,
        callback: MessageCallback,
    ) -> SessionResult<SubscriptionHandle> {
        MqttSession::subscribe(self, topic, qos, callback).await
    }

    async fn unsubscribe(&self, handle: &SubscriptionHandle) {
        MqttSession::unsubscribe(self, handle).await;
    }

    async fn unsubscribe_topic(&self, topic: &str) {
        MqttSession::unsubscribe_topic(self, topic).await;
    }

    async fn publish(
        &self,
        topic: &str,
        payload: OutboundPayload,
        qos: QosLevel,
        retain: bool,
    ) -> bool {
        MqttSession::publish(self, topic, payload, qos, retain).await
    }

    fn is_connected(&self) -> bool {
        MqttSession::is_connected(self)
    }

    fn session_state(&self) -> SessionState {
        MqttSession::session_state(self)
    }
}

impl Drop for MqttSession {
    fn drop(&mut self) {
        // Cannot run async shutdown here; stop the background task and let
        // the broker notice the dead socket
        let _ = self.shutdown_tx.send(true);
        if let Ok(mut guard) = self.loop_handle.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
