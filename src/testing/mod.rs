//! Testing utilities and mock implementations
//!
//! Lets the dispatch pipeline, the publisher and the client facade be
//! exercised without a running broker.

pub mod mocks;

pub use mocks::*;
