//! Logging bootstrap tests
//!
//! The global subscriber can only be installed once per process, so these
//! tests check that repeated initialization is harmless rather than
//! inspecting output.

use mqtt_event_client::observability::logging::{init_default_logging, init_logging, LogFormat};
use mqtt_event_client::{dispatch_span, mqtt_span};
use tracing::Level;

#[test]
fn test_repeated_initialization_is_harmless() {
    init_logging(Level::DEBUG, LogFormat::Compact, false);
    init_logging(Level::INFO, LogFormat::Json, true);

    temp_env::with_vars(
        [
            ("LOG_LEVEL", Some("trace")),
            ("LOG_FORMAT", Some("pretty")),
            ("LOG_SPANS", Some("true")),
        ],
        init_default_logging,
    );

    tracing::info!(topic = "User/Registration/Add", "logging still works");
}

#[test]
fn test_span_macros_build_named_spans() {
    init_logging(Level::INFO, LogFormat::Json, false);

    let mqtt = mqtt_span!(client_id = "test-client");
    let dispatch = dispatch_span!(topic = "User/Registration/Add", qos = 1);

    if let Some(metadata) = mqtt.metadata() {
        assert_eq!(metadata.name(), "mqtt_operation");
    }
    if let Some(metadata) = dispatch.metadata() {
        assert_eq!(metadata.name(), "dispatch");
    }
}
