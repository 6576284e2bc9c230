//! Inbound and outbound message types
//!
//! These are transport-neutral. The MQTT transport converts rumqttc packets
//! into [`InboundMessage`] and [`OutboundMessage`] into publish requests.

use crate::error::MessagingError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Delivery guarantee requested for a subscription or a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    /// QoS 0: fire and forget, never acknowledged
    AtMostOnce,
    /// QoS 1: acknowledged with PUBACK, may be redelivered
    AtLeastOnce,
    /// QoS 2: four-way handshake
    ExactlyOnce,
}

impl QoS {
    pub fn level(self) -> u8 {
        match self {
            QoS::AtMostOnce => 0,
            QoS::AtLeastOnce => 1,
            QoS::ExactlyOnce => 2,
        }
    }

    /// Whether the broker expects an acknowledgement for this level
    pub fn requires_ack(self) -> bool {
        self != QoS::AtMostOnce
    }
}

impl TryFrom<u8> for QoS {
    type Error = MessagingError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(MessagingError::InvalidQos(other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> u8 {
        qos.level()
    }
}

impl fmt::Display for QoS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.level())
    }
}

/// Broker-assigned delivery metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryMetadata {
    /// Packet identifier, 0 for QoS 0 deliveries
    pub message_id: u16,
    /// Set by the broker when this is a redelivery
    pub duplicate: bool,
    pub retain: bool,
}

/// A raw message received from the broker
///
/// Lives for the duration of one dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub metadata: DeliveryMetadata,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            metadata: DeliveryMetadata::default(),
        }
    }

    pub fn with_metadata(mut self, metadata: DeliveryMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A serialized message ready to hand to the transport
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
}

impl OutboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>, qos: QoS) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos,
            retain: false,
        }
    }
}
