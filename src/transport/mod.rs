//! Transport layer for broker communication
//!
//! This module provides the transport abstraction used by the dispatch
//! pipeline and the publisher, plus the MQTT implementation.

use crate::error::MessagingError;
use crate::protocol::{InboundMessage, OutboundMessage, QoS, TopicPattern};
use tokio::sync::{mpsc, oneshot, watch};

pub mod mqtt;

pub use mqtt::ConnectionState;

/// Transport trait for broker communication
///
/// This trait provides an abstraction over the physical link to the broker
/// to enable dependency injection and testing. Implementations use interior
/// mutability so one instance can be shared between the publisher, the
/// dispatch pipeline and the owning client.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Establish the link; resolves once the broker accepted the session
    async fn connect(&self) -> Result<(), MessagingError>;

    /// Close the link; idempotent, always ends in `Disconnected`
    async fn disconnect(&self) -> Result<(), MessagingError>;

    /// Register a filter with the broker
    async fn subscribe(&self, pattern: &TopicPattern, qos: QoS) -> Result<(), MessagingError>;

    /// Remove a filter from the broker
    async fn unsubscribe(&self, pattern: &TopicPattern) -> Result<(), MessagingError>;

    /// Hand a message to the broker; fails with `NotConnected` unless connected
    async fn publish(&self, message: OutboundMessage) -> Result<(), MessagingError>;

    /// Acknowledge a QoS 1/2 delivery
    async fn acknowledge(&self, message: &InboundMessage) -> Result<(), MessagingError>;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Subscribe to connection state changes
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// Set the channel inbound frames are delivered to
    fn set_inbound_sender(&self, sender: mpsc::Sender<InboundMessage>);

    /// Take the one-shot receiver that fires when the link is lost for good
    ///
    /// Returns `None` on every call after the first.
    fn take_connection_lost(&self) -> Option<oneshot::Receiver<MessagingError>>;

    /// Check if transport is currently connected
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
