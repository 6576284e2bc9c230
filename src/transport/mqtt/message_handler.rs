//! Pure message routing and processing logic for MQTT events
//!
//! This module contains pure functions for handling rumqttc events and
//! converting between broker packets and the client's message types.

use super::connection::{from_mqtt_qos, to_mqtt_qos};
use crate::protocol::{DeliveryMetadata, InboundMessage};
use rumqttc::{Event, Packet, Publish, SubscribeReasonCode};

/// Routing decisions for MQTT events
#[derive(Debug, Clone)]
pub enum EventRoute {
    /// Broker accepted the session
    ConnectionAcknowledged { session_present: bool },
    /// Message received on a subscribed filter
    MessageReceived(InboundMessage),
    /// Broker closed the session
    Disconnected,
    /// Subscription outcome; `rejected` counts refused filters
    SubscriptionConfirmed { packet_id: u16, rejected: usize },
    /// Keep-alive and acknowledgement traffic
    InfrastructureEvent(String),
    /// Outgoing event (handled by rumqttc)
    OutgoingEvent,
}

/// Route MQTT event to appropriate handler (pure routing decision)
pub fn route_mqtt_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(Packet::ConnAck(ack)) => EventRoute::ConnectionAcknowledged {
            session_present: ack.session_present,
        },
        Event::Incoming(Packet::Publish(publish)) => {
            EventRoute::MessageReceived(to_inbound_message(publish))
        }
        Event::Incoming(Packet::Disconnect) => EventRoute::Disconnected,
        Event::Incoming(Packet::SubAck(suback)) => EventRoute::SubscriptionConfirmed {
            packet_id: suback.pkid,
            rejected: suback
                .return_codes
                .iter()
                .filter(|code| matches!(code, SubscribeReasonCode::Failure))
                .count(),
        },
        Event::Incoming(other) => EventRoute::InfrastructureEvent(format!("{other:?}")),
        Event::Outgoing(_) => EventRoute::OutgoingEvent,
    }
}

/// Convert a broker publish into an inbound message (pure function)
pub fn to_inbound_message(publish: &Publish) -> InboundMessage {
    InboundMessage::new(
        publish.topic.clone(),
        publish.payload.clone(),
        from_mqtt_qos(publish.qos),
    )
    .with_metadata(DeliveryMetadata {
        message_id: publish.pkid,
        duplicate: publish.dup,
        retain: publish.retain,
    })
}

/// Rebuild the packet identity rumqttc needs to acknowledge a delivery
pub fn to_ack_packet(message: &InboundMessage) -> Publish {
    let mut publish = Publish::new(
        message.topic.as_str(),
        to_mqtt_qos(message.qos),
        Vec::<u8>::new(),
    );
    publish.pkid = message.metadata.message_id;
    publish
}
