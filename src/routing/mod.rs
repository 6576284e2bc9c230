//! Subscription routing
//!
//! [`SubscriptionRegistry`] maps topic patterns to typed handlers and
//! resolves an inbound topic to the single most specific subscription.

pub mod handler;
pub mod registry;

pub use handler::{erase, handler_fn, ErasedHandler, EventHandler, FnHandler, HandlerError};
pub use registry::{Subscription, SubscriptionRegistry};
