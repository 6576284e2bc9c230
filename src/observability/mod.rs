//! Observability: structured logging and dispatch statistics

pub mod logging;
pub mod metrics;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use metrics::{DispatchSnapshot, DispatchStats};

// Span macros for structured logging
pub use logging::{dispatch_span, mqtt_span};
