//! End-to-end consumer scenario: registration events persisted through the
//! user registration handler


use mqtt_event_client::handlers::UserRegistrationHandler;
use mqtt_event_client::protocol::{QoS, UserRegistrationEvent, USER_REGISTRATION_TOPIC};
use mqtt_event_client::storage::InMemoryStorage;
use mqtt_event_client::testing::eventually;
use mqtt_event_client::transport::ConnectionState;
use std::sync::Arc;
use test_helpers::{connected_client, numbered_event, sample_event, test_dispatch_config, WAIT};

#[tokio::test]
async fn test_registrations_are_stored() {
    // Arrange: consumer wired like the binary does it
    let client = connected_client(test_dispatch_config()).await;
    let storage = Arc::new(InMemoryStorage::new());
    client
        .subscribe::<UserRegistrationEvent, _>(
            USER_REGISTRATION_TOPIC,
            QoS::AtLeastOnce,
            UserRegistrationHandler::new(Arc::clone(&storage)),
        )
        .await
        .unwrap();

    // Act: a producer publishes three registrations
    let publisher = client.publisher();
    for n in 0..3 {
        publisher
            .publish(USER_REGISTRATION_TOPIC, &numbered_event(n), QoS::AtLeastOnce)
            .await
            .unwrap();
    }

    // Assert
    assert!(eventually(WAIT, || client.stats().handled == 3).await);
    assert_eq!(storage.user_count().await, 3);
    let stored = storage.find_by_email("user1@example.com").await.unwrap();
    assert_eq!(stored.name, "User 1");
    assert_eq!(client.transport().acknowledged().await.len(), 3);
}

#[tokio::test]
async fn test_duplicate_registration_is_a_contained_failure() {
    let client = connected_client(test_dispatch_config()).await;
    let storage = Arc::new(InMemoryStorage::new());
    client
        .subscribe::<UserRegistrationEvent, _>(
            USER_REGISTRATION_TOPIC,
            QoS::AtMostOnce,
            UserRegistrationHandler::new(Arc::clone(&storage)),
        )
        .await
        .unwrap();

    for _ in 0..2 {
        client
            .publish(USER_REGISTRATION_TOPIC, &sample_event(), QoS::AtMostOnce)
            .await
            .unwrap();
    }

    assert!(eventually(WAIT, || client.stats().handler_failures == 1).await);
    assert_eq!(client.stats().handled, 1);
    assert_eq!(storage.user_count().await, 1);
    assert_eq!(client.state(), ConnectionState::Connected);
}
