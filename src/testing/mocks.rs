//! Mock implementations for testing
//!
//! [`MockTransport`] behaves like a single-client broker: publishes to a
//! filter the client itself subscribed to loop back as inbound deliveries,
//! and link loss is driven through the same [`LinkSupervisor`] the MQTT
//! transport uses.

use crate::error::MessagingError;
use crate::protocol::{
    topic_matches, DeliveryMetadata, Event, InboundMessage, OutboundMessage, QoS, TopicPattern,
};
use crate::routing::{EventHandler, HandlerError};
use crate::transport::mqtt::{ConnectionEvent, LinkDecision, LinkSupervisor, ReconnectPolicy};
use crate::transport::{ConnectionState, Transport};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Reconnection policy with delays short enough for tests
pub fn fast_reconnect_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
    }
}

/// In-process transport for testing
pub struct MockTransport {
    supervisor: StdMutex<LinkSupervisor>,
    state_tx: watch::Sender<ConnectionState>,
    fail_connect: AtomicBool,
    fail_publish: AtomicBool,
    fail_subscribe: AtomicBool,
    loopback: bool,
    filters: StdMutex<BTreeMap<String, QoS>>,
    subscribe_requests: StdMutex<Vec<String>>,
    inbound: StdMutex<Option<mpsc::Sender<InboundMessage>>>,
    lost_tx: StdMutex<Option<oneshot::Sender<MessagingError>>>,
    lost_rx: StdMutex<Option<oneshot::Receiver<MessagingError>>>,
    next_message_id: AtomicU16,
    published: Mutex<Vec<OutboundMessage>>,
    acknowledged: Mutex<Vec<InboundMessage>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::with_policy(Some(fast_reconnect_policy(3)))
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mock whose reconnection follows `policy`
    pub fn with_policy(policy: Option<ReconnectPolicy>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (lost_tx, lost_rx) = oneshot::channel();
        Self {
            supervisor: StdMutex::new(LinkSupervisor::new(policy)),
            state_tx,
            fail_connect: AtomicBool::new(false),
            fail_publish: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            loopback: true,
            filters: StdMutex::new(BTreeMap::new()),
            subscribe_requests: StdMutex::new(Vec::new()),
            inbound: StdMutex::new(None),
            lost_tx: StdMutex::new(Some(lost_tx)),
            lost_rx: StdMutex::new(Some(lost_rx)),
            next_message_id: AtomicU16::new(1),
            published: Mutex::new(Vec::new()),
            acknowledged: Mutex::new(Vec::new()),
        }
    }

    /// Mock whose broker refuses every connection
    pub fn with_failure() -> Self {
        let transport = Self::new();
        transport.fail_connect.store(true, Ordering::SeqCst);
        transport
    }

    /// Mock that records publishes without delivering them back
    pub fn without_loopback() -> Self {
        Self {
            loopback: false,
            ..Self::new()
        }
    }

    pub fn set_publish_failure(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_subscribe_failure(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    pub async fn published(&self) -> Vec<OutboundMessage> {
        self.published.lock().await.clone()
    }

    pub async fn acknowledged(&self) -> Vec<InboundMessage> {
        self.acknowledged.lock().await.clone()
    }

    /// Filters currently registered with the simulated broker
    pub fn broker_filters(&self) -> Vec<(String, QoS)> {
        lock(&self.filters)
            .iter()
            .map(|(filter, qos)| (filter.clone(), *qos))
            .collect()
    }

    /// Every SUBSCRIBE sent to the simulated broker, replays included
    pub fn subscribe_requests(&self) -> Vec<String> {
        lock(&self.subscribe_requests).clone()
    }

    pub fn reconnect_count(&self) -> u32 {
        lock(&self.supervisor).health().reconnect_count
    }

    /// Deliver a message as if the broker had sent it
    ///
    /// Returns false when no inbound sender is attached.
    pub async fn deliver(&self, message: InboundMessage) -> bool {
        let sender = lock(&self.inbound).clone();
        match sender {
            Some(sender) => sender.send(message).await.is_ok(),
            None => false,
        }
    }

    /// Deliver a raw payload on `topic`, assigning a packet id for QoS 1/2
    pub async fn deliver_raw(&self, topic: &str, payload: &[u8], qos: QoS) -> bool {
        let message = self.stamp(InboundMessage::new(topic, payload.to_vec(), qos), false);
        self.deliver(message).await
    }

    /// Simulate an unsolicited link loss
    ///
    /// The broker stays unreachable for `failed_attempts` reconnection
    /// attempts and then accepts the session again. Backoff delays are slept
    /// for real. Returns the final decision: `Established { resumed: true }`
    /// on recovery or `GiveUp` once the policy is exhausted.
    pub async fn simulate_outage(&self, failed_attempts: u32) -> LinkDecision {
        let mut remaining_failures = failed_attempts;
        let mut decision = self.apply(ConnectionEvent::LinkLost("connection reset".into()));

        loop {
            match decision {
                LinkDecision::Retry { delay, .. } => {
                    tokio::time::sleep(delay).await;
                    decision = if remaining_failures > 0 {
                        remaining_failures -= 1;
                        self.apply(ConnectionEvent::LinkLost("broker unreachable".into()))
                    } else {
                        self.apply(ConnectionEvent::ConnAckReceived)
                    };
                }
                LinkDecision::Established { .. } => {
                    self.replay_subscriptions();
                    return decision;
                }
                LinkDecision::GiveUp { attempts, ref reason } => {
                    let error = MessagingError::ConnectionLost {
                        attempts,
                        reason: reason.clone(),
                    };
                    if let Some(lost_tx) = lock(&self.lost_tx).take() {
                        let _ = lost_tx.send(error);
                    }
                    return decision;
                }
                other => return other,
            }
        }
    }

    fn apply(&self, event: ConnectionEvent) -> LinkDecision {
        let mut supervisor = lock(&self.supervisor);
        let decision = supervisor.on_event(event);
        self.state_tx.send_replace(supervisor.state());
        decision
    }

    fn replay_subscriptions(&self) {
        let filters: Vec<String> = lock(&self.filters).keys().cloned().collect();
        lock(&self.subscribe_requests).extend(filters);
    }

    fn stamp(&self, message: InboundMessage, retain: bool) -> InboundMessage {
        let message_id = if message.qos.requires_ack() {
            self.next_message_id.fetch_add(1, Ordering::SeqCst)
        } else {
            0
        };
        message.with_metadata(DeliveryMetadata {
            message_id,
            duplicate: false,
            retain,
        })
    }

    /// Highest QoS granted among the filters matching `topic`
    fn loopback_qos(&self, topic: &str) -> Option<QoS> {
        lock(&self.filters)
            .iter()
            .filter(|(filter, _)| topic_matches(topic, filter))
            .map(|(_, qos)| *qos)
            .max_by_key(|qos| qos.level())
    }

    fn ensure_connected(&self) -> Result<(), MessagingError> {
        match self.state() {
            ConnectionState::Connected => Ok(()),
            state => Err(MessagingError::NotConnected { state }),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self) -> Result<(), MessagingError> {
        if self.state() == ConnectionState::Connected {
            return Ok(());
        }

        self.apply(ConnectionEvent::ConnectRequested);
        if self.fail_connect.load(Ordering::SeqCst) {
            let decision = self.apply(ConnectionEvent::LinkLost("connection refused".into()));
            let reason = match decision {
                LinkDecision::ConnectFailed { reason } => reason,
                _ => "connection refused".to_string(),
            };
            return Err(MessagingError::connection(reason));
        }

        self.apply(ConnectionEvent::ConnAckReceived);
        self.replay_subscriptions();
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        self.apply(ConnectionEvent::ShutdownRequested);
        self.apply(ConnectionEvent::ShutdownComplete);
        lock(&self.filters).clear();
        Ok(())
    }

    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), MessagingError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(MessagingError::transport("mock subscribe failure"));
        }
        lock(&self.filters).insert(pattern.as_str().to_string(), qos);
        if self.is_connected() {
            lock(&self.subscribe_requests).push(pattern.as_str().to_string());
        }
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &TopicPattern) -> Result<(), MessagingError> {
        lock(&self.filters).remove(pattern.as_str());
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        self.ensure_connected()?;
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(MessagingError::transport("mock publish failure"));
        }

        self.published.lock().await.push(message.clone());

        if self.loopback {
            if let Some(granted) = self.loopback_qos(&message.topic) {
                let qos = message.qos.min(granted);
                let inbound = InboundMessage::new(message.topic, message.payload, qos);
                let inbound = self.stamp(inbound, message.retain);
                self.deliver(inbound).await;
            }
        }
        Ok(())
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError> {
        if !message.qos.requires_ack() {
            return Ok(());
        }
        self.ensure_connected()?;
        self.acknowledged.lock().await.push(message.clone());
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>) {
        *lock(&self.inbound) = Some(sender);
    }

    fn take_connection_lost(&self) -> Option<oneshot::Receiver<MessagingError>> {
        lock(&self.lost_rx).take()
    }
}

/// Handler that records every event it receives
pub struct RecordingHandler<E> {
    events: Mutex<Vec<E>>,
    delay: Option<Duration>,
}

impl<E> Default for RecordingHandler<E> {
    fn default() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            delay: None,
        }
    }
}

impl<E: Clone + Send + 'static> RecordingHandler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep `delay` before recording each event
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    pub async fn events(&self) -> Vec<E> {
        self.events.lock().await.clone()
    }

    /// Wait until at least `count` events were recorded
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.events.lock().await.len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[async_trait]
impl<E: Event + Clone> EventHandler<E> for RecordingHandler<E> {
    async fn handle(&self, event: E) -> Result<(), HandlerError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.events.lock().await.push(event);
        Ok(())
    }
}

/// Handler that always fails
#[derive(Debug, Default)]
pub struct FailingHandler {
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Event> EventHandler<E> for FailingHandler {
    async fn handle(&self, _event: E) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::failed("simulated handler failure"))
    }
}

/// Handler that panics on every call
#[derive(Debug, Default)]
pub struct PanickingHandler {
    calls: AtomicUsize,
}

impl PanickingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<E: Event> EventHandler<E> for PanickingHandler {
    async fn handle(&self, _event: E) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        panic!("simulated handler panic");
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

