//! Messaging client facade
//!
//! [`MessagingClient`] ties the transport, the subscription registry, the
//! dispatch pipeline and the publisher together. It is an ordinary value:
//! create one per process and pass it to whoever needs to publish or
//! subscribe.

use crate::config::ClientConfig;
use crate::error::{MessagingError, MessagingResult};
use crate::observability::{DispatchSnapshot, DispatchStats};
use crate::processing::{DispatchConfig, Dispatcher};
use crate::protocol::{Event, QoS, TopicPattern};
use crate::publisher::Publisher;
use crate::routing::{erase, EventHandler, Subscription, SubscriptionRegistry};
use crate::transport::{ConnectionState, MqttTransport, Transport};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{oneshot, watch, Mutex};
use tracing::{debug, info};

/// Connection, subscriptions and dispatch for one broker session
pub struct MessagingClient<T: Transport> {
    transport: Arc<T>,
    registry: Arc<SubscriptionRegistry>,
    publisher: Publisher<T>,
    stats: Arc<DispatchStats>,
    dispatch_config: DispatchConfig,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl MessagingClient<MqttTransport> {
    /// Build an MQTT-backed client from a validated configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        let transport = MqttTransport::new(config.broker.clone(), config.reconnect.policy());
        Self::with_transport(Arc::new(transport), config.dispatch.dispatch_config())
    }
}

impl<T: Transport> MessagingClient<T> {
    pub fn with_transport(transport: Arc<T>, dispatch_config: DispatchConfig) -> Self {
        Self {
            publisher: Publisher::new(Arc::clone(&transport)),
            transport,
            registry: Arc::new(SubscriptionRegistry::new()),
            stats: Arc::new(DispatchStats::new()),
            dispatch_config,
            dispatcher: Mutex::new(None),
        }
    }

    /// Start the dispatch pipeline and open the broker session
    pub async fn connect(&self) -> MessagingResult<()> {
        {
            let mut dispatcher = self.dispatcher.lock().await;
            if dispatcher.is_none() {
                *dispatcher = Some(Dispatcher::start(
                    self.dispatch_config.clone(),
                    Arc::clone(&self.registry),
                    Arc::clone(&self.transport),
                    Arc::clone(&self.stats),
                ));
            }
        }

        self.transport.connect().await
    }

    /// Register `handler` for `pattern`, replacing any handler already there
    ///
    /// The filter is sent to the broker right away when connected, or on the
    /// next session otherwise.
    pub async fn subscribe<E, H>(&self, pattern: &str, qos: QoS, handler: H) -> MessagingResult<()>
    where
        E: Event,
        H: EventHandler<E>,
    {
        let parsed = TopicPattern::parse(pattern)?;
        let previous = self.registry.subscribe(pattern, qos, erase(handler)).await?;

        if let Err(e) = self.transport.subscribe(&parsed, qos).await {
            self.restore_subscription(&parsed, previous).await;
            return Err(e);
        }

        if let Some(previous) = previous {
            debug!(pattern = %parsed, previous_qos = %previous.qos(), "Replaced handler");
        }
        info!(pattern = %parsed, qos = %qos, event = E::KIND, "Subscription registered");
        Ok(())
    }

    /// Undo a registry write whose broker subscription failed
    async fn restore_subscription(
        &self,
        pattern: &TopicPattern,
        previous: Option<Arc<Subscription>>,
    ) {
        match previous {
            Some(previous) => {
                let restored = self
                    .registry
                    .subscribe(
                        pattern.as_str(),
                        previous.qos(),
                        Arc::clone(previous.handler()),
                    )
                    .await;
                if restored.is_ok() {
                    debug!(pattern = %pattern, "Restored previous handler after failed subscribe");
                }
            }
            None => {
                self.registry.unsubscribe(pattern).await;
            }
        }
    }

    /// Remove the subscription for `pattern`; a no-op when absent
    pub async fn unsubscribe(&self, pattern: &str) -> MessagingResult<()> {
        let parsed = TopicPattern::parse(pattern)?;
        if self.registry.unsubscribe(&parsed).await.is_none() {
            return Ok(());
        }

        self.transport.unsubscribe(&parsed).await?;
        info!(pattern = %parsed, "Subscription removed");
        Ok(())
    }

    pub async fn publish<E: Event>(&self, topic: &str, event: &E, qos: QoS) -> MessagingResult<()> {
        self.publisher.publish(topic, event, qos).await
    }

    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> MessagingResult<()> {
        self.publisher.publish_raw(topic, payload, qos).await
    }

    /// A publisher sharing this client's transport
    pub fn publisher(&self) -> Publisher<T> {
        self.publisher.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.transport.state()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.transport.watch_state()
    }

    /// Fires once if the link is lost for good; `None` after the first call
    pub fn take_connection_lost(&self) -> Option<oneshot::Receiver<MessagingError>> {
        self.transport.take_connection_lost()
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> DispatchSnapshot {
        self.stats.snapshot()
    }

    /// Drain dispatch, drop all subscriptions and disconnect
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) -> MessagingResult<()> {
        let dispatcher = self.dispatcher.lock().await.take();
        if let Some(mut dispatcher) = dispatcher {
            dispatcher.shutdown().await;
        }

        let removed = self.registry.clear().await;
        if !removed.is_empty() {
            debug!(count = removed.len(), "Cleared subscriptions");
        }

        self.transport.disconnect().await
    }
}
