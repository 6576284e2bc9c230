//! MQTT transport integration tests
//!
//! The tests marked `#[ignore]` need a broker. Start one (for example
//! `docker run -p 1883:1883 eclipse-mosquitto:2 mosquitto -c /mosquitto-no-auth.conf`)
//! and run `cargo test -- --ignored`. `MQTT_HOST_URL`, `MQTT_USERNAME` and
//! `MQTT_PASSWORD` override the defaults.


use mqtt_event_client::client::MessagingClient;
use mqtt_event_client::config::ClientConfig;
use mqtt_event_client::error::MessagingError;
use mqtt_event_client::protocol::{QoS, UserRegistrationEvent, USER_REGISTRATION_TOPIC};
use mqtt_event_client::testing::RecordingHandler;
use mqtt_event_client::transport::mqtt::{parse_broker_url, MqttClient};
use mqtt_event_client::transport::{ConnectionState, Transport};
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{sample_event, WAIT};

fn broker_config(host_url: &str) -> ClientConfig {
    ClientConfig::default()
        .with_credentials_from(|name| match name {
            "MQTT_HOST_URL" => Some(
                std::env::var("MQTT_HOST_URL").unwrap_or_else(|_| host_url.to_string()),
            ),
            "MQTT_USERNAME" => Some(std::env::var("MQTT_USERNAME").unwrap_or_else(|_| "test".into())),
            "MQTT_PASSWORD" => Some(std::env::var("MQTT_PASSWORD").unwrap_or_else(|_| "test".into())),
            _ => None,
        })
        .unwrap()
}

fn unreachable_config() -> ClientConfig {
    let mut config = ClientConfig::default()
        .with_credentials_from(|name| match name {
            "MQTT_HOST_URL" => Some("mqtt://127.0.0.1:1".to_string()),
            _ => Some("test".to_string()),
        })
        .unwrap();
    config.broker.connect_timeout_ms = 2000;
    config
}

#[tokio::test]
async fn test_unreachable_broker_fails_fast_with_connection_error() {
    // Arrange: nothing listens on port 1
    let client = MessagingClient::from_config(&unreachable_config());

    // Act
    let result = tokio::time::timeout(Duration::from_secs(5), client.connect())
        .await
        .expect("connect must not retry indefinitely");

    // Assert: reported to the caller, not absorbed by the reconnect policy
    let error = result.unwrap_err();
    assert!(matches!(error, MessagingError::Connection { .. }));
    assert!(error.is_fatal());
    assert_eq!(client.state(), ConnectionState::Disconnected);

    client.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_client_id_from_config_is_used() {
    let mut config = unreachable_config();
    config.broker.client_id = Some("registration-consumer".to_string());

    let transport = MqttClient::new(config.broker.clone(), config.reconnect.policy());
    assert_eq!(transport.client_id(), "registration-consumer");
}

#[test]
fn test_broker_url_forms() {
    let plain = parse_broker_url("mqtt://broker.local:1884").unwrap();
    assert_eq!((plain.host.as_str(), plain.port, plain.tls), ("broker.local", 1884, false));

    let tls = parse_broker_url("mqtts://broker.local").unwrap();
    assert_eq!((tls.port, tls.tls), (8883, true));

    assert!(parse_broker_url("http://broker.local").is_err());
}

#[tokio::test]
#[ignore = "requires an MQTT broker"]
async fn test_live_broker_round_trip() {
    let client = MessagingClient::from_config(&broker_config("mqtt://localhost:1883"));
    let handler = Arc::new(RecordingHandler::<UserRegistrationEvent>::new());

    client
        .subscribe::<UserRegistrationEvent, _>(
            USER_REGISTRATION_TOPIC,
            QoS::AtMostOnce,
            Arc::clone(&handler),
        )
        .await
        .unwrap();
    client.connect().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Connected);

    // give the broker a moment to process the SUBSCRIBE
    tokio::time::sleep(Duration::from_millis(200)).await;
    client
        .publish(USER_REGISTRATION_TOPIC, &sample_event(), QoS::AtMostOnce)
        .await
        .unwrap();

    assert!(handler.wait_for(1, WAIT).await);
    assert_eq!(handler.events().await, vec![sample_event()]);

    client.shutdown().await.unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
#[ignore = "requires an MQTT broker"]
async fn test_live_broker_qos1_is_acknowledged() {
    let client = MessagingClient::from_config(&broker_config("mqtt://localhost:1883"));
    let handler = Arc::new(RecordingHandler::<UserRegistrationEvent>::new());
    client.connect().await.unwrap();
    client
        .subscribe::<UserRegistrationEvent, _>(
            "test/qos1/+",
            QoS::AtLeastOnce,
            Arc::clone(&handler),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    client
        .publish("test/qos1/registration", &sample_event(), QoS::AtLeastOnce)
        .await
        .unwrap();

    assert!(handler.wait_for(1, WAIT).await);
    let deadline = tokio::time::Instant::now() + WAIT;
    while client.stats().acknowledged == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(client.stats().acknowledged, 1);

    client.shutdown().await.unwrap();
}

#[tokio::test]
#[ignore = "requires an MQTT broker"]
async fn test_live_transport_disconnect_is_idempotent() {
    let config = broker_config("mqtt://localhost:1883");
    let transport = MqttClient::new(config.broker.clone(), config.reconnect.policy());

    transport.connect().await.unwrap();
    assert!(transport.link_health().is_some());

    transport.disconnect().await.unwrap();
    transport.disconnect().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}
