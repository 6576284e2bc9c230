//! Inbound message processing

pub mod ack;
pub mod dispatcher;

pub use ack::{AckDecision, AckPolicy, DispatchOutcome, RedeliveryTracker};
pub use dispatcher::{run_isolated, DispatchConfig, DispatchFailure, Dispatcher};
