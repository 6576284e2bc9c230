//! Client configuration
//!
//! Broker address and credentials always come from the environment
//! (`MQTT_HOST_URL`, `MQTT_USERNAME`, `MQTT_PASSWORD`). Everything else has a
//! default and may be tuned through an optional TOML file:
//!
//! ```toml
//! [broker]
//! client_id = "registration-consumer"
//! keep_alive_secs = 30
//! clean_session = false
//!
//! [reconnect]
//! max_attempts = 5
//! initial_delay_ms = 200
//! max_delay_ms = 10000
//!
//! [dispatch]
//! worker_pool_size = 4
//! ack_policy = "redeliver"
//! max_redeliveries = 3
//! ```

use crate::processing::{AckPolicy, DispatchConfig};
use crate::transport::mqtt::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub const HOST_URL_ENV: &str = "MQTT_HOST_URL";
pub const USERNAME_ENV: &str = "MQTT_USERNAME";
pub const PASSWORD_ENV: &str = "MQTT_PASSWORD";

/// Complete client configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub broker: BrokerSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub dispatch: DispatchSection,
}

/// Broker connection settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`
    #[serde(skip)]
    pub host_url: String,
    #[serde(skip)]
    pub username: String,
    #[serde(skip)]
    pub password: String,
    /// Fixed client identifier; a random one is generated when absent
    pub client_id: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_clean_session")]
    pub clean_session: bool,
    /// Capacity of the outbound request queue towards the event loop
    #[serde(default = "default_request_capacity")]
    pub request_capacity: usize,
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_clean_session() -> bool {
    true
}

fn default_request_capacity() -> usize {
    10
}

impl Default for BrokerSection {
    fn default() -> Self {
        Self {
            host_url: String::new(),
            username: String::new(),
            password: String::new(),
            client_id: None,
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_ms: default_connect_timeout_ms(),
            clean_session: default_clean_session(),
            request_capacity: default_request_capacity(),
        }
    }
}

impl BrokerSection {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Resolve the client identifier, generating one when not configured
    pub fn resolve_client_id(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("mqtt-event-client-{}", uuid::Uuid::new_v4().simple()))
    }
}

/// Automatic reconnection after an unsolicited link loss
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_reconnect_enabled")]
    pub enabled: bool,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_reconnect_enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    10
}

fn default_initial_delay_ms() -> u64 {
    100
}

fn default_max_delay_ms() -> u64 {
    5_000
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: default_reconnect_enabled(),
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl ReconnectSection {
    /// `None` when reconnection is disabled
    pub fn policy(&self) -> Option<ReconnectPolicy> {
        self.enabled.then(|| ReconnectPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
        })
    }
}

/// Acknowledgement behaviour for failed dispatches
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckPolicyKind {
    AcknowledgeAndDrop,
    Redeliver,
}

/// Dispatch pipeline tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSection {
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    pub handler_timeout_ms: Option<u64>,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
    #[serde(default = "default_ack_policy")]
    pub ack_policy: AckPolicyKind,
    #[serde(default = "default_max_redeliveries")]
    pub max_redeliveries: u32,
}

fn default_worker_pool_size() -> usize {
    8
}

fn default_queue_capacity() -> usize {
    64
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

fn default_ack_policy() -> AckPolicyKind {
    AckPolicyKind::AcknowledgeAndDrop
}

fn default_max_redeliveries() -> u32 {
    3
}

impl Default for DispatchSection {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            queue_capacity: default_queue_capacity(),
            handler_timeout_ms: None,
            shutdown_grace_ms: default_shutdown_grace_ms(),
            ack_policy: default_ack_policy(),
            max_redeliveries: default_max_redeliveries(),
        }
    }
}

impl DispatchSection {
    pub fn dispatch_config(&self) -> DispatchConfig {
        let ack_policy = match self.ack_policy {
            AckPolicyKind::AcknowledgeAndDrop => AckPolicy::AcknowledgeAndDrop,
            AckPolicyKind::Redeliver => AckPolicy::Redeliver {
                max_redeliveries: self.max_redeliveries,
            },
        };

        DispatchConfig {
            worker_pool_size: self.worker_pool_size,
            queue_capacity: self.queue_capacity,
            handler_timeout: self.handler_timeout_ms.map(Duration::from_millis),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            ack_policy,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load tuning from an optional TOML file, then credentials from the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::load_tuning_file(path)?,
            None => Self::default(),
        };
        config.with_credentials_from(|name| std::env::var(name).ok())
    }

    /// Defaults plus credentials from the environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Parse the TOML tuning file without resolving credentials
    pub fn load_tuning_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Fill broker address and credentials from a variable lookup and validate
    pub fn with_credentials_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &str| -> Result<String, ConfigError> {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| ConfigError::EnvVarNotFound(name.to_string()))
        };

        self.broker.host_url = required(HOST_URL_ENV)?;
        self.broker.username = required(USERNAME_ENV)?;
        self.broker.password = required(PASSWORD_ENV)?;

        self.validate()?;
        Ok(self)
    }

    /// Check cross-field consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.broker.host_url).map_err(|e| {
            ConfigError::InvalidConfig(format!("broker host URL is not a URL: {e}"))
        })?;
        if !matches!(url.scheme(), "mqtt" | "mqtts" | "tcp" | "ssl") {
            return Err(ConfigError::InvalidConfig(format!(
                "unsupported broker URL scheme '{}'",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(ConfigError::InvalidConfig(
                "broker host URL has no host".to_string(),
            ));
        }
        if self.broker.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "keep_alive_secs must be greater than 0".to_string(),
            ));
        }
        if self.broker.request_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "request_capacity must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.enabled {
            if self.reconnect.max_attempts == 0 {
                return Err(ConfigError::InvalidConfig(
                    "reconnect.max_attempts must be greater than 0".to_string(),
                ));
            }
            if self.reconnect.initial_delay_ms == 0
                || self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms
            {
                return Err(ConfigError::InvalidConfig(
                    "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms"
                        .to_string(),
                ));
            }
        }
        if self.dispatch.worker_pool_size == 0 || self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::InvalidConfig(
                "worker_pool_size and queue_capacity must be greater than 0".to_string(),
            ));
        }
        // brokers only resend unacknowledged messages into a resumed session
        if self.dispatch.ack_policy == AckPolicyKind::Redeliver && self.broker.clean_session {
            return Err(ConfigError::InvalidConfig(
                "ack_policy = \"redeliver\" requires broker.clean_session = false".to_string(),
            ));
        }
        Ok(())
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self::default()
            .with_credentials_from(|name| match name {
                HOST_URL_ENV => Some("mqtt://localhost:1883".to_string()),
                USERNAME_ENV => Some("test-user".to_string()),
                PASSWORD_ENV => Some("test-pass".to_string()),
                _ => None,
            })
            .expect("Test config should validate")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn test_credentials_resolved() {
        let config = ClientConfig::test_config();
        assert_eq!(config.broker.host_url, "mqtt://localhost:1883");
        assert_eq!(config.broker.username, "test-user");
        assert_eq!(config.broker.password, "test-pass");
    }

    #[test]
    fn test_each_credential_is_required() {
        let all = [
            (HOST_URL_ENV, "mqtt://localhost:1883"),
            (USERNAME_ENV, "user"),
            (PASSWORD_ENV, "pass"),
        ];

        for missing in [HOST_URL_ENV, USERNAME_ENV, PASSWORD_ENV] {
            let vars: Vec<_> = all.iter().copied().filter(|(k, _)| *k != missing).collect();
            let result = ClientConfig::default().with_credentials_from(lookup_from(&vars));

            match result {
                Err(ConfigError::EnvVarNotFound(name)) => assert_eq!(name, missing),
                other => panic!("expected missing {missing}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_blank_credential_counts_as_missing() {
        let result = ClientConfig::default().with_credentials_from(lookup_from(&[
            (HOST_URL_ENV, "mqtt://localhost:1883"),
            (USERNAME_ENV, "  "),
            (PASSWORD_ENV, "pass"),
        ]));
        assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == USERNAME_ENV));
    }

    #[test]
    fn test_invalid_host_url() {
        for url in ["not a url", "http://localhost:1883"] {
            let result = ClientConfig::default().with_credentials_from(lookup_from(&[
                (HOST_URL_ENV, url),
                (USERNAME_ENV, "user"),
                (PASSWORD_ENV, "pass"),
            ]));
            assert!(
                matches!(result, Err(ConfigError::InvalidConfig(_))),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn test_tuning_sections_parse() {
        let toml_content = r#"
[broker]
client_id = "consumer-1"
keep_alive_secs = 30

[reconnect]
max_attempts = 4
initial_delay_ms = 50
max_delay_ms = 400

[dispatch]
worker_pool_size = 2
handler_timeout_ms = 1500
ack_policy = "redeliver"
max_redeliveries = 5
"#;

        let config: ClientConfig = toml::from_str(toml_content).unwrap();
        assert_eq!(config.broker.client_id.as_deref(), Some("consumer-1"));
        assert_eq!(config.broker.keep_alive_secs, 30);
        assert_eq!(config.broker.connect_timeout_ms, 10_000);
        assert_eq!(config.reconnect.max_attempts, 4);
        assert_eq!(config.dispatch.worker_pool_size, 2);
        assert_eq!(config.dispatch.queue_capacity, 64);

        let dispatch = config.dispatch.dispatch_config();
        assert_eq!(dispatch.handler_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(
            dispatch.ack_policy,
            AckPolicy::Redeliver {
                max_redeliveries: 5
            }
        );

        let policy = config.reconnect.policy().unwrap();
        assert_eq!(policy.max_attempts, 4);
        assert_eq!(policy.max_delay, Duration::from_millis(400));
    }

    #[test]
    fn test_credentials_in_file_are_ignored() {
        let toml_content = r#"
[broker]
host_url = "mqtt://from-file:1883"
"#;
        // serde(skip) fields are never read from the file
        let config: ClientConfig = toml::from_str(toml_content).unwrap();
        assert!(config.broker.host_url.is_empty());
    }

    #[test]
    fn test_reconnect_disabled_has_no_policy() {
        let section = ReconnectSection {
            enabled: false,
            ..Default::default()
        };
        assert!(section.policy().is_none());
    }

    #[test]
    fn test_invalid_reconnect_delays() {
        let mut config = ClientConfig::test_config();
        config.reconnect.max_delay_ms = 10;
        config.reconnect.initial_delay_ms = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));

        config.reconnect.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generated_client_ids_are_unique() {
        let broker = BrokerSection::default();
        assert_ne!(broker.resolve_client_id(), broker.resolve_client_id());

        let fixed = BrokerSection {
            client_id: Some("fixed".to_string()),
            ..Default::default()
        };
        assert_eq!(fixed.resolve_client_id(), "fixed");
    }
}
