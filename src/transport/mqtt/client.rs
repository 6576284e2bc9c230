//! Impure I/O operations for MQTT client
//!
//! This module owns the rumqttc event loop task: it feeds link events to the
//! [`LinkSupervisor`], forwards inbound publishes to the dispatch pipeline and
//! replays tracked subscriptions whenever a session is (re)established.

use super::connection::{configure_mqtt_options, to_mqtt_qos, ConnectionState, ReconnectPolicy};
use super::health_monitor::{ConnectionEvent, LinkDecision, LinkHealth, LinkSupervisor};
use super::message_handler::{route_mqtt_event, to_ack_packet, EventRoute};
use crate::config::BrokerSection;
use crate::error::MessagingError;
use crate::mqtt_span;
use crate::protocol::{InboundMessage, OutboundMessage, QoS, TopicPattern};
use crate::transport::Transport;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, Outgoing};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn, Instrument};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const DISCONNECT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

type SharedSlot<T> = Arc<Mutex<Option<T>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// MQTT transport backed by rumqttc
pub struct MqttClient {
    config: BrokerSection,
    client_id: String,
    reconnect: Option<ReconnectPolicy>,
    client: SharedSlot<AsyncClient>,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    inbound: SharedSlot<mpsc::Sender<InboundMessage>>,
    lost_tx: SharedSlot<oneshot::Sender<MessagingError>>,
    lost_rx: Mutex<Option<oneshot::Receiver<MessagingError>>>,
    health: Arc<Mutex<Option<LinkHealth>>>,
    event_loop_handle: Mutex<Option<JoinHandle<()>>>,
}

/// Everything the event loop task shares with the owning client
struct LoopContext {
    client: AsyncClient,
    state_tx: Arc<watch::Sender<ConnectionState>>,
    shutdown_rx: watch::Receiver<bool>,
    subscriptions: Arc<Mutex<HashMap<String, QoS>>>,
    inbound: SharedSlot<mpsc::Sender<InboundMessage>>,
    lost_tx: SharedSlot<oneshot::Sender<MessagingError>>,
    health: Arc<Mutex<Option<LinkHealth>>>,
}

impl MqttClient {
    /// Create a client; no I/O happens until [`Transport::connect`]
    pub fn new(config: BrokerSection, reconnect: Option<ReconnectPolicy>) -> Self {
        let client_id = config.resolve_client_id();
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let (lost_tx, lost_rx) = oneshot::channel();

        Self {
            config,
            client_id,
            reconnect,
            client: Arc::new(Mutex::new(None)),
            state_tx: Arc::new(state_tx),
            shutdown_tx: Arc::new(shutdown_tx),
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            inbound: Arc::new(Mutex::new(None)),
            lost_tx: Arc::new(Mutex::new(Some(lost_tx))),
            lost_rx: Mutex::new(Some(lost_rx)),
            health: Arc::new(Mutex::new(None)),
            event_loop_handle: Mutex::new(None),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Latest link health published by the event loop
    pub fn link_health(&self) -> Option<LinkHealth> {
        lock(&self.health).clone()
    }

    fn current_client(&self) -> Result<AsyncClient, MessagingError> {
        lock(&self.client)
            .clone()
            .ok_or(MessagingError::NotConnected {
                state: self.state(),
            })
    }

    fn ensure_connected(&self) -> Result<AsyncClient, MessagingError> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(MessagingError::NotConnected { state });
        }
        self.current_client()
    }

    async fn await_event_loop(&self) {
        let handle = lock(&self.event_loop_handle).take();
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut handle).await {
            Ok(Ok(())) => debug!("MQTT event loop shut down gracefully"),
            Ok(Err(e)) if !e.is_cancelled() => warn!("MQTT event loop ended with error: {}", e),
            Ok(Err(_)) => {}
            Err(_) => {
                warn!("MQTT event loop didn't shut down gracefully, forcing abort");
                handle.abort();
            }
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    async fn connect(&self) -> Result<(), MessagingError> {
        match self.state() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Disconnected => {}
            state => {
                return Err(MessagingError::connection(format!(
                    "connect called while {state:?}"
                )))
            }
        }

        let mqtt_options = configure_mqtt_options(&self.config, &self.client_id)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, self.config.request_capacity);
        *lock(&self.client) = Some(client.clone());

        self.shutdown_tx.send_replace(false);

        let mut supervisor = LinkSupervisor::new(self.reconnect.clone());
        supervisor.on_event(ConnectionEvent::ConnectRequested);
        self.state_tx.send_replace(supervisor.state());

        info!(
            client_id = %self.client_id,
            broker = %self.config.host_url,
            "Connecting to MQTT broker"
        );

        let (connected_tx, connected_rx) = oneshot::channel();
        let context = LoopContext {
            client,
            state_tx: self.state_tx.clone(),
            shutdown_rx: self.shutdown_tx.subscribe(),
            subscriptions: self.subscriptions.clone(),
            inbound: self.inbound.clone(),
            lost_tx: self.lost_tx.clone(),
            health: self.health.clone(),
        };
        let span = mqtt_span!(client_id = %self.client_id, broker = %self.config.host_url);
        let handle = tokio::spawn(
            run_event_loop(context, event_loop, supervisor, connected_tx).instrument(span),
        );
        *lock(&self.event_loop_handle) = Some(handle);

        let outcome = match tokio::time::timeout(self.config.connect_timeout(), connected_rx).await
        {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(MessagingError::connection("connection attempt aborted")),
            Err(_) => Err(MessagingError::connection(format!(
                "no ConnAck from {} within {:?}",
                self.config.host_url,
                self.config.connect_timeout()
            ))),
        };

        if let Err(e) = outcome {
            self.shutdown_tx.send_replace(true);
            self.await_event_loop().await;
            lock(&self.client).take();
            self.state_tx.send_replace(ConnectionState::Disconnected);
            error!("MQTT connection failed: {}", e);
            return Err(e);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), MessagingError> {
        let has_loop = lock(&self.event_loop_handle).is_some();
        if self.state() == ConnectionState::Disconnected && !has_loop {
            return Ok(());
        }

        self.state_tx.send_replace(ConnectionState::Disconnecting);

        if let Some(client) = lock(&self.client).take() {
            // best effort; a full request queue just means no DISCONNECT packet
            if let Err(e) = client.try_disconnect() {
                debug!("Could not queue MQTT DISCONNECT: {}", e);
            }
        }

        self.shutdown_tx.send_replace(true);
        self.await_event_loop().await;

        // broker-side subscriptions end with the session
        lock(&self.subscriptions).clear();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        info!(client_id = %self.client_id, "MQTT client disconnected");
        Ok(())
    }

    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), MessagingError> {
        lock(&self.subscriptions).insert(pattern.as_str().to_string(), qos);

        // Filters registered before the session is up are sent on ConnAck
        if self.state() != ConnectionState::Connected {
            debug!(filter = %pattern, "Deferring subscription until connected");
            return Ok(());
        }

        self.current_client()?
            .subscribe(pattern.as_str(), to_mqtt_qos(qos))
            .await
            .map_err(|e| MessagingError::transport(format!("subscribe to {pattern} failed: {e}")))?;

        info!(filter = %pattern, qos = %qos, "Subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, pattern: &TopicPattern) -> Result<(), MessagingError> {
        let removed = lock(&self.subscriptions).remove(pattern.as_str()).is_some();
        if !removed || self.state() != ConnectionState::Connected {
            return Ok(());
        }

        self.current_client()?
            .unsubscribe(pattern.as_str())
            .await
            .map_err(|e| {
                MessagingError::transport(format!("unsubscribe from {pattern} failed: {e}"))
            })?;

        info!(filter = %pattern, "Unsubscribed");
        Ok(())
    }

    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let client = self.ensure_connected()?;

        client
            .publish_bytes(
                message.topic.as_str(),
                to_mqtt_qos(message.qos),
                message.retain,
                message.payload,
            )
            .await
            .map_err(|e| MessagingError::transport(format!("publish to {} failed: {e}", message.topic)))
    }

    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError> {
        if !message.qos.requires_ack() {
            return Ok(());
        }

        let client = self.ensure_connected()?;
        client
            .ack(&to_ack_packet(message))
            .await
            .map_err(|e| MessagingError::transport(format!("ack on {} failed: {e}", message.topic)))
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

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.event_loop_handle).take() {
            handle.abort();
        }
    }
}

async fn run_event_loop(
    mut ctx: LoopContext,
    mut event_loop: EventLoop,
    mut supervisor: LinkSupervisor,
    connected_tx: oneshot::Sender<Result<(), MessagingError>>,
) {
    let mut connected_tx = Some(connected_tx);
    let mut shutdown_rx = ctx.shutdown_rx.clone();

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    if supervisor.state() == ConnectionState::Connected {
                        flush_disconnect(&mut event_loop).await;
                    }
                    break;
                }
            }

            polled = event_loop.poll() => {
                let keep_running = match polled {
                    Ok(event) => handle_event(&mut ctx, &mut supervisor, &mut connected_tx, &event).await,
                    Err(e) => {
                        let reason = e.to_string();
                        handle_link_lost(&mut ctx, &mut supervisor, &mut connected_tx, reason).await
                    }
                };
                if !keep_running {
                    break;
                }
            }
        }
    }

    debug!("MQTT event loop stopped");
}

/// Returns false when the loop should stop
async fn handle_event(
    ctx: &mut LoopContext,
    supervisor: &mut LinkSupervisor,
    connected_tx: &mut Option<oneshot::Sender<Result<(), MessagingError>>>,
    event: &Event,
) -> bool {
    match route_mqtt_event(event) {
        EventRoute::ConnectionAcknowledged { session_present } => {
            let decision = supervisor.on_event(ConnectionEvent::ConnAckReceived);
            publish_state(ctx, supervisor);

            if let LinkDecision::Established { resumed } = decision {
                debug!(session_present, resumed, "Session established");
                replay_subscriptions(ctx);
                if let Some(tx) = connected_tx.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            true
        }
        EventRoute::MessageReceived(message) => {
            forward_inbound(ctx, message).await;
            true
        }
        EventRoute::Disconnected => {
            let reason = "broker closed the session".to_string();
            handle_link_lost(ctx, supervisor, connected_tx, reason).await
        }
        EventRoute::SubscriptionConfirmed {
            packet_id,
            rejected,
        } => {
            if rejected > 0 {
                warn!(packet_id, rejected, "Broker rejected subscription");
            } else {
                debug!(target: "mqtt_transport", packet_id, "Subscription confirmed");
            }
            true
        }
        EventRoute::InfrastructureEvent(event) => {
            debug!(target: "mqtt_transport", "MQTT event: {}", event);
            true
        }
        EventRoute::OutgoingEvent => true,
    }
}

/// Returns false when the loop should stop
async fn handle_link_lost(
    ctx: &mut LoopContext,
    supervisor: &mut LinkSupervisor,
    connected_tx: &mut Option<oneshot::Sender<Result<(), MessagingError>>>,
    reason: String,
) -> bool {
    if *ctx.shutdown_rx.borrow() {
        return false;
    }

    let decision = supervisor.on_event(ConnectionEvent::LinkLost(reason));
    publish_state(ctx, supervisor);

    match decision {
        LinkDecision::ConnectFailed { reason } => {
            if let Some(tx) = connected_tx.take() {
                let _ = tx.send(Err(MessagingError::connection(reason)));
            }
            false
        }
        LinkDecision::Retry { delay, .. } => {
            // rumqttc reconnects on the next poll
            interruptible_sleep(ctx.shutdown_rx.clone(), delay).await
        }
        LinkDecision::GiveUp { attempts, reason } => {
            error!(attempts, reason = %reason, "Giving up on MQTT connection");
            if let Some(tx) = lock(&ctx.lost_tx).take() {
                let _ = tx.send(MessagingError::ConnectionLost { attempts, reason });
            }
            false
        }
        LinkDecision::Ignore
        | LinkDecision::Connecting
        | LinkDecision::Established { .. }
        | LinkDecision::Stop => false,
    }
}

fn publish_state(ctx: &LoopContext, supervisor: &LinkSupervisor) {
    *lock(&ctx.health) = Some(supervisor.health());
    // disconnect() owns the state once shutdown has been requested
    if !*ctx.shutdown_rx.borrow() {
        ctx.state_tx.send_replace(supervisor.state());
    }
}

fn replay_subscriptions(ctx: &LoopContext) {
    let filters: Vec<(String, QoS)> = lock(&ctx.subscriptions)
        .iter()
        .map(|(filter, qos)| (filter.clone(), *qos))
        .collect();

    // try_ variant: this task is the one draining the request queue
    for (filter, qos) in filters {
        match ctx.client.try_subscribe(filter.as_str(), to_mqtt_qos(qos)) {
            Ok(()) => debug!(target: "mqtt_transport", "Subscribed to: {}", filter),
            Err(e) => error!("Failed to subscribe to {}: {}", filter, e),
        }
    }
}

/// Hand a delivery to the pipeline, waiting for queue space
async fn forward_inbound(ctx: &mut LoopContext, message: InboundMessage) {
    let sender = lock(&ctx.inbound).clone();
    let Some(sender) = sender else {
        warn!(topic = %message.topic, "No dispatcher attached, dropping message");
        if message.qos.requires_ack() {
            let _ = ctx.client.try_ack(&to_ack_packet(&message));
        }
        return;
    };

    let topic = message.topic.clone();
    tokio::select! {
        sent = sender.send(message) => {
            if sent.is_err() {
                warn!(topic = %topic, "Dispatcher closed, dropping message");
            }
        }
        _ = ctx.shutdown_rx.changed() => {
            debug!(topic = %topic, "Shutdown while waiting for dispatch capacity");
        }
    }
}

/// Perform interruptible sleep with shutdown monitoring
/// Returns true if sleep completed, false if shutdown requested
async fn interruptible_sleep(mut shutdown_rx: watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        _ = shutdown_rx.changed() => {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received during reconnection delay, stopping");
                return false;
            }
            true
        }
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Drive the event loop until the queued DISCONNECT has been written
async fn flush_disconnect(event_loop: &mut EventLoop) {
    let _ = tokio::time::timeout(DISCONNECT_FLUSH_TIMEOUT, async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                Ok(_) => continue,
            }
        }
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker_config(host_url: &str) -> BrokerSection {
        BrokerSection {
            host_url: host_url.to_string(),
            username: "user".to_string(),
            password: "pass".to_string(),
            connect_timeout_ms: 2000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_new_client_is_disconnected() {
        let client = MqttClient::new(broker_config("mqtt://localhost:1883"), None);
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(client.link_health().is_none());
    }

    #[tokio::test]
    async fn test_publish_before_connect_is_not_connected() {
        let client = MqttClient::new(broker_config("mqtt://localhost:1883"), None);
        let result = client
            .publish(OutboundMessage::new("a/b", b"{}".to_vec(), QoS::AtLeastOnce))
            .await;

        assert!(matches!(
            result,
            Err(MessagingError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
    }

    #[tokio::test]
    async fn test_subscribe_before_connect_is_deferred() {
        let client = MqttClient::new(broker_config("mqtt://localhost:1883"), None);
        let pattern = TopicPattern::parse("User/+/Add").unwrap();

        client.subscribe(&pattern, QoS::AtLeastOnce).await.unwrap();
        assert_eq!(
            lock(&client.subscriptions).get("User/+/Add"),
            Some(&QoS::AtLeastOnce)
        );

        client.unsubscribe(&pattern).await.unwrap();
        assert!(lock(&client.subscriptions).is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_port_fails_without_retry() {
        let client = MqttClient::new(
            broker_config("mqtt://127.0.0.1:1"),
            Some(ReconnectPolicy::default()),
        );

        let result = client.connect().await;
        assert!(matches!(result, Err(MessagingError::Connection { .. })));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = MqttClient::new(broker_config("mqtt://localhost:1883"), None);
        client.disconnect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_connection_lost_receiver_taken_once() {
        let client = MqttClient::new(broker_config("mqtt://localhost:1883"), None);
        assert!(client.take_connection_lost().is_some());
        assert!(client.take_connection_lost().is_none());
    }
}
