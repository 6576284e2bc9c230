//! Configuration loading and validation tests
//!
//! Credentials come from the environment; tuning comes from an optional
//! TOML file. These tests exercise both sources together.

use mqtt_event_client::config::{ClientConfig, ConfigError};
use mqtt_event_client::processing::AckPolicy;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const BROKER_ENV: [(&str, Option<&str>); 3] = [
    ("MQTT_HOST_URL", Some("mqtt://broker.local:1884")),
    ("MQTT_USERNAME", Some("consumer")),
    ("MQTT_PASSWORD", Some("s3cret")),
];

#[test]
fn test_from_env_reads_credentials() {
    temp_env::with_vars(BROKER_ENV, || {
        let config = ClientConfig::from_env().unwrap();

        assert_eq!(config.broker.host_url, "mqtt://broker.local:1884");
        assert_eq!(config.broker.username, "consumer");
        assert_eq!(config.broker.password, "s3cret");
        assert_eq!(config.broker.keep_alive_secs, 60);
        assert!(config.reconnect.policy().is_some());
    });
}

#[test]
fn test_missing_env_var_is_reported_by_name() {
    temp_env::with_vars(
        [
            ("MQTT_HOST_URL", Some("mqtt://broker.local")),
            ("MQTT_USERNAME", Some("consumer")),
            ("MQTT_PASSWORD", None),
        ],
        || {
            let result = ClientConfig::from_env();
            assert!(
                matches!(result, Err(ConfigError::EnvVarNotFound(ref name)) if name == "MQTT_PASSWORD"),
                "got {result:?}"
            );
        },
    );
}

#[test]
fn test_empty_env_var_is_missing() {
    temp_env::with_vars(
        [
            ("MQTT_HOST_URL", Some("")),
            ("MQTT_USERNAME", Some("consumer")),
            ("MQTT_PASSWORD", Some("s3cret")),
        ],
        || {
            assert!(matches!(
                ClientConfig::from_env(),
                Err(ConfigError::EnvVarNotFound(_))
            ));
        },
    );
}

#[test]
fn test_tuning_file_combined_with_env() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(
        temp_file,
        r#"
[broker]
client_id = "registration-consumer"
clean_session = false

[reconnect]
max_attempts = 3
initial_delay_ms = 250

[dispatch]
worker_pool_size = 2
queue_capacity = 16
shutdown_grace_ms = 1000
ack_policy = "redeliver"
"#
    )
    .unwrap();

    temp_env::with_vars(BROKER_ENV, || {
        let config = ClientConfig::load(Some(temp_file.path())).unwrap();

        assert_eq!(config.broker.client_id.as_deref(), Some("registration-consumer"));
        assert!(!config.broker.clean_session);
        assert_eq!(config.broker.username, "consumer");

        let policy = config.reconnect.policy().unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff_delay(2), Duration::from_millis(500));

        let dispatch = config.dispatch.dispatch_config();
        assert_eq!(dispatch.worker_pool_size, 2);
        assert_eq!(dispatch.queue_capacity, 16);
        assert_eq!(dispatch.shutdown_grace, Duration::from_secs(1));
        assert_eq!(dispatch.ack_policy, AckPolicy::Redeliver { max_redeliveries: 3 });
    });
}

#[test]
fn test_invalid_toml_is_a_parse_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[dispatch\nworker_pool_size = ").unwrap();

    let result = ClientConfig::load_tuning_file(temp_file.path());
    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_unknown_ack_policy_is_rejected() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[dispatch]\nack_policy = \"retry_forever\"").unwrap();

    assert!(matches!(
        ClientConfig::load_tuning_file(temp_file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_zero_worker_pool_is_invalid() {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "[dispatch]\nworker_pool_size = 0").unwrap();

    temp_env::with_vars(BROKER_ENV, || {
        let result = ClientConfig::load(Some(temp_file.path()));
        assert!(matches!(result, Err(ConfigError::InvalidConfig(_))));
    });
}

#[test]
fn test_redeliver_requires_persistent_session() {
    let mut clean = NamedTempFile::new().unwrap();
    writeln!(clean, "[dispatch]\nack_policy = \"redeliver\"").unwrap();

    let mut persistent = NamedTempFile::new().unwrap();
    writeln!(
        persistent,
        "[broker]\nclean_session = false\n\n[dispatch]\nack_policy = \"redeliver\""
    )
    .unwrap();

    temp_env::with_vars(BROKER_ENV, || {
        match ClientConfig::load(Some(clean.path())) {
            Err(ConfigError::InvalidConfig(message)) => {
                assert!(message.contains("clean_session"), "{message}")
            }
            other => panic!("expected InvalidConfig, got {other:?}"),
        }

        let config = ClientConfig::load(Some(persistent.path())).unwrap();
        assert!(!config.broker.clean_session);
        assert_eq!(
            config.dispatch.dispatch_config().ack_policy,
            AckPolicy::Redeliver { max_redeliveries: 3 }
        );
    });
}

#[test]
fn test_missing_file_is_a_read_error() {
    let result = ClientConfig::load_tuning_file(std::path::Path::new("/nonexistent/client.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}
