//! Outbound publishing
//!
//! Validates the concrete topic, encodes the event and hands it to the
//! transport. There is no retry here: a [`MessagingError::NotConnected`]
//! goes straight back to the caller.

use crate::error::MessagingError;
use crate::protocol::{validate_publish_topic, Event, JsonCodec, OutboundMessage, QoS};
use crate::transport::Transport;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Publishes events through a shared transport
pub struct Publisher<T: Transport> {
    transport: Arc<T>,
}

impl<T: Transport> Clone for Publisher<T> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
        }
    }
}

impl<T: Transport> Publisher<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self { transport }
    }

    /// Encode `event` as JSON and publish it on `topic`
    pub async fn publish<E: Event>(
        &self,
        topic: &str,
        event: &E,
        qos: QoS,
    ) -> Result<(), MessagingError> {
        validate_publish_topic(topic)?;
        let payload = JsonCodec::encode(event)?;
        self.send(OutboundMessage::new(topic, payload, qos)).await
    }

    /// Publish a pre-serialized payload
    pub async fn publish_raw(
        &self,
        topic: &str,
        payload: impl Into<Bytes>,
        qos: QoS,
    ) -> Result<(), MessagingError> {
        validate_publish_topic(topic)?;
        self.send(OutboundMessage::new(topic, payload, qos)).await
    }

    async fn send(&self, message: OutboundMessage) -> Result<(), MessagingError> {
        let topic = message.topic.clone();
        let qos = message.qos;
        let size = message.payload.len();

        self.transport.publish(message).await?;
        debug!(topic = %topic, qos = %qos, bytes = size, "Published message");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{TopicError, UserRegistrationEvent};
    use crate::testing::MockTransport;
    use crate::transport::ConnectionState;

    fn sample() -> UserRegistrationEvent {
        UserRegistrationEvent::new("Andrew Roberts", "blah@gmail.com", "000-000-0000").unwrap()
    }

    async fn connected() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.connect().await.unwrap();
        transport
    }

    #[tokio::test]
    async fn test_publish_encodes_event() {
        let transport = connected().await;
        let publisher = Publisher::new(Arc::clone(&transport));

        publisher
            .publish("User/Registration/Add", &sample(), QoS::AtLeastOnce)
            .await
            .unwrap();

        let published = transport.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "User/Registration/Add");
        assert_eq!(published[0].qos, QoS::AtLeastOnce);
        assert_eq!(
            &published[0].payload[..],
            br#"{"name":"Andrew Roberts","email":"blah@gmail.com","phoneNumber":"000-000-0000"}"#
        );
    }

    #[tokio::test]
    async fn test_publish_rejects_wildcard_topics() {
        let transport = connected().await;
        let publisher = Publisher::new(Arc::clone(&transport));

        for topic in ["User/+/Add", "User/#", ""] {
            let result = publisher.publish(topic, &sample(), QoS::AtMostOnce).await;
            assert!(
                matches!(result, Err(MessagingError::InvalidTopic(_))),
                "{topic:?} gave {result:?}"
            );
        }

        let result = publisher.publish_raw("a/+", b"{}".to_vec(), QoS::AtMostOnce).await;
        assert!(matches!(
            result,
            Err(MessagingError::InvalidTopic(TopicError::WildcardInPublishTopic(_)))
        ));
        assert!(transport.published().await.is_empty());
    }

    #[tokio::test]
    async fn test_publish_when_disconnected() {
        let transport = Arc::new(MockTransport::new());
        let publisher = Publisher::new(Arc::clone(&transport));

        let result = publisher
            .publish("User/Registration/Add", &sample(), QoS::AtMostOnce)
            .await;
        assert!(matches!(
            result,
            Err(MessagingError::NotConnected {
                state: ConnectionState::Disconnected
            })
        ));
    }
}
