//! Business events carried over the broker

use super::codec::{Event, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Topic the registration events are published on
pub const USER_REGISTRATION_TOPIC: &str = "User/Registration/Add";

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is a valid regex")
});

/// A new user signed up
///
/// Wire format: `{"name": "...", "email": "...", "phoneNumber": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRegistrationEvent {
    name: String,
    email: String,
    phone_number: String,
}

impl UserRegistrationEvent {
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        phone_number: impl Into<String>,
    ) -> Result<Self, ValidationError> {
        let event = Self {
            name: name.into(),
            email: email.into(),
            phone_number: phone_number.into(),
        };
        event.validate()?;
        Ok(event)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }
    Ok(())
}

impl Event for UserRegistrationEvent {
    const KIND: &'static str = "user registration event";

    fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("name", &self.name)?;
        require_non_empty("email", &self.email)?;
        require_non_empty("phoneNumber", &self.phone_number)?;

        if !EMAIL_PATTERN.is_match(&self.email) {
            return Err(ValidationError::new(
                "email",
                format!("'{}' is not an email address", self.email),
            ));
        }
        Ok(())
    }
}
