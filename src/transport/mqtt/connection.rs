//! Pure connection state management for MQTT client
//!
//! This module contains pure functions for connection state management,
//! reconnection policy and broker option construction.

use crate::config::BrokerSection;
use crate::error::MessagingError;
use crate::protocol::QoS;
use rumqttc::MqttOptions;
use rumqttc::Transport as RumqttcTransport;
use std::time::Duration;
use url::Url;

/// Connection state for MQTT client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial and terminal state
    Disconnected,
    /// Initial handshake in progress
    Connecting,
    /// Session accepted by the broker
    Connected,
    /// Link lost, waiting to retry (attempt count starts at 1)
    Reconnecting { attempt: u32 },
    /// Explicit shutdown in progress
    Disconnecting,
}

/// Bounded exponential backoff for automatic reconnection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before the link is declared lost
    pub max_attempts: u32,
    /// Delay before the first attempt
    pub initial_delay: Duration,
    /// Cap applied after doubling
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt: `initial * 2^(attempt-1)`, capped at `max_delay`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Sum of all backoff delays, the longest a reconnection cycle sleeps
    pub fn backoff_window(&self) -> Duration {
        (1..=self.max_attempts)
            .map(|attempt| self.backoff_delay(attempt))
            .sum()
    }
}

pub(crate) fn to_mqtt_qos(qos: QoS) -> rumqttc::QoS {
    match qos {
        QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
        QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        QoS::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
    }
}

pub(crate) fn from_mqtt_qos(qos: rumqttc::QoS) -> QoS {
    match qos {
        rumqttc::QoS::AtMostOnce => QoS::AtMostOnce,
        rumqttc::QoS::AtLeastOnce => QoS::AtLeastOnce,
        rumqttc::QoS::ExactlyOnce => QoS::ExactlyOnce,
    }
}

/// Parsed broker endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Pure function to extract host, port and TLS flag from the broker URL
pub fn parse_broker_url(broker_url: &str) -> Result<BrokerEndpoint, MessagingError> {
    let url = Url::parse(broker_url)
        .map_err(|_| MessagingError::connection(format!("invalid broker URL: {broker_url}")))?;

    let tls = matches!(url.scheme(), "mqtts" | "ssl");
    if !tls && !matches!(url.scheme(), "mqtt" | "tcp") {
        return Err(MessagingError::connection(format!(
            "unsupported broker URL scheme: {}",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| MessagingError::connection(format!("broker URL has no host: {broker_url}")))?;
    let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

    Ok(BrokerEndpoint {
        host: host.to_string(),
        port,
        tls,
    })
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(
    config: &BrokerSection,
    client_id: &str,
) -> Result<MqttOptions, MessagingError> {
    let endpoint = parse_broker_url(&config.host_url)?;

    if config.username.is_empty() || config.password.is_empty() {
        return Err(MessagingError::connection(
            "broker credentials must not be empty",
        ));
    }

    let mut mqtt_options = MqttOptions::new(client_id, endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    mqtt_options.set_credentials(&config.username, &config.password);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(config.clean_session);

    // Acks are sent by the dispatch pipeline once the handler has decided
    mqtt_options.set_manual_acks(true);

    mqtt_options.set_max_packet_size(256 * 1024, 256 * 1024);

    Ok(mqtt_options)
}
