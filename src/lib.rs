//! MQTT event client
//!
//! A publish/subscribe messaging client for MQTT brokers with a typed
//! subscription registry and an isolated dispatch pipeline.
//!
//! # Overview
//!
//! - [`transport`]: the broker link, with bounded automatic reconnection
//! - [`routing`]: topic pattern → handler registry with deterministic
//!   wildcard resolution
//! - [`protocol`]: wire types and the JSON event codec
//! - [`processing`]: dispatch lanes, handler isolation and acknowledgement
//! - [`publisher`]: encode-and-send for outbound events
//! - [`client`]: the [`MessagingClient`] facade tying them together
//!
//! # Quick Start
//!
//! ```rust
//! use mqtt_event_client::client::MessagingClient;
//! use mqtt_event_client::processing::DispatchConfig;
//! use mqtt_event_client::protocol::{QoS, UserRegistrationEvent, USER_REGISTRATION_TOPIC};
//! use mqtt_event_client::routing::{handler_fn, HandlerError};
//! use mqtt_event_client::testing::MockTransport;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let client = MessagingClient::with_transport(
//!     Arc::new(MockTransport::new()),
//!     DispatchConfig::default(),
//! );
//! client.connect().await.unwrap();
//!
//! client
//!     .subscribe::<UserRegistrationEvent, _>(
//!         USER_REGISTRATION_TOPIC,
//!         QoS::AtMostOnce,
//!         handler_fn(|event: UserRegistrationEvent| async move {
//!             println!("new user: {}", event.name());
//!             Ok::<(), HandlerError>(())
//!         }),
//!     )
//!     .await
//!     .unwrap();
//!
//! let event = UserRegistrationEvent::new("Andrew Roberts", "blah@gmail.com", "000-000-0000").unwrap();
//! client
//!     .publish(USER_REGISTRATION_TOPIC, &event, QoS::AtMostOnce)
//!     .await
//!     .unwrap();
//!
//! client.shutdown().await.unwrap();
//! # });
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handlers;
pub mod observability;
pub mod processing;
pub mod protocol;
pub mod publisher;
pub mod routing;
pub mod storage;
pub mod testing;
pub mod transport;

pub use client::MessagingClient;
pub use config::{ClientConfig, ConfigError};
pub use error::{MessagingError, MessagingResult};
pub use protocol::{DecodeError, Event, QoS, UserRegistrationEvent};
