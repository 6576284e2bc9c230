//! MQTT transport built on rumqttc
//!
//! The module is split into four focused sub-modules:
//!
//! - [`connection`] - Pure connection state, reconnect policy and broker options
//! - [`message_handler`] - Pure routing of rumqttc events
//! - [`health_monitor`] - Pure link supervision and reconnection decisions
//! - [`client`] - Impure I/O operations and coordination
//!
//! # Usage
//!
//! ```rust,no_run
//! use mqtt_event_client::config::BrokerSection;
//! use mqtt_event_client::transport::mqtt::{MqttClient, ReconnectPolicy};
//! use mqtt_event_client::transport::Transport;
//!
//! # tokio_test::block_on(async {
//! let config = BrokerSection {
//!     host_url: "mqtt://localhost:1883".to_string(),
//!     username: "user".to_string(),
//!     password: "secret".to_string(),
//!     ..Default::default()
//! };
//!
//! let client = MqttClient::new(config, Some(ReconnectPolicy::default()));
//! client.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod health_monitor;
pub mod message_handler;

pub use client::MqttClient;
pub use connection::{parse_broker_url, BrokerEndpoint, ConnectionState, ReconnectPolicy};
pub use health_monitor::{ConnectionEvent, LinkDecision, LinkHealth, LinkSupervisor};
pub use message_handler::EventRoute;
