//! Wire-level types: messages, topics and the event codec
//!
//! Everything in here is pure. No module in `protocol` performs I/O.

pub mod codec;
pub mod events;
pub mod messages;
pub mod topics;

pub use codec::{DecodeError, Event, JsonCodec, ValidationError};
pub use events::{UserRegistrationEvent, USER_REGISTRATION_TOPIC};
pub use messages::*;
pub use topics::*;
