//! JSON event codec
//!
//! Decoding is split in two stages so failures can be classified:
//! bytes → `serde_json::Value` (failure is a malformed payload), then
//! `Value` → typed event plus [`Event::validate`] (failure is a schema
//! violation).

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// A typed, schema-validated message body
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Short name used in logs
    const KIND: &'static str;

    /// Check field-level invariants that serde cannot express
    fn validate(&self) -> Result<(), ValidationError>;
}

/// Field-level validation failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("field '{field}' {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Why a payload could not be turned into an event
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Not UTF-8 or not JSON at all
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    /// Valid JSON that does not describe a valid event
    #[error("schema violation: {0}")]
    SchemaViolation(String),
}

/// Stateless JSON codec for [`Event`] types
pub struct JsonCodec;

impl JsonCodec {
    pub fn decode<E: Event>(payload: &[u8]) -> Result<E, DecodeError> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| DecodeError::MalformedPayload(format!("payload is not UTF-8: {e}")))?;

        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|e| DecodeError::MalformedPayload(format!("payload is not JSON: {e}")))?;

        let event: E = serde_json::from_value(value).map_err(|e| {
            DecodeError::SchemaViolation(format!("not a valid {}: {e}", E::KIND))
        })?;

        event
            .validate()
            .map_err(|e| DecodeError::SchemaViolation(e.to_string()))?;

        Ok(event)
    }

    pub fn encode<E: Event>(event: &E) -> Result<Vec<u8>, crate::error::MessagingError> {
        event
            .validate()
            .map_err(|e| crate::error::MessagingError::encode(format!("invalid {}: {e}", E::KIND)))?;

        serde_json::to_vec(event).map_err(|e| crate::error::MessagingError::encode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Ping {
        seq: u32,
    }

    impl Event for Ping {
        const KIND: &'static str = "ping";

        fn validate(&self) -> Result<(), ValidationError> {
            if self.seq == 0 {
                return Err(ValidationError::new("seq", "must be positive"));
            }
            Ok(())
        }
    }

    #[test]
    fn test_decode_valid() {
        let ping: Ping = JsonCodec::decode(br#"{"seq": 7}"#).unwrap();
        assert_eq!(ping, Ping { seq: 7 });
    }

    #[test]
    fn test_non_utf8_is_malformed() {
        let result = JsonCodec::decode::<Ping>(&[0xff, 0xfe, 0x00]);
        assert!(matches!(result, Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_non_json_is_malformed() {
        let result = JsonCodec::decode::<Ping>(b"seq=7");
        assert!(matches!(result, Err(DecodeError::MalformedPayload(_))));

        let result = JsonCodec::decode::<Ping>(b"");
        assert!(matches!(result, Err(DecodeError::MalformedPayload(_))));
    }

    #[test]
    fn test_wrong_shape_is_schema_violation() {
        for payload in [&b"42"[..], b"[]", b"{}", br#"{"seq": "seven"}"#] {
            let result = JsonCodec::decode::<Ping>(payload);
            assert!(
                matches!(result, Err(DecodeError::SchemaViolation(_))),
                "payload {:?} gave {result:?}",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_validation_failure_is_schema_violation() {
        let result = JsonCodec::decode::<Ping>(br#"{"seq": 0}"#);
        match result {
            Err(DecodeError::SchemaViolation(message)) => assert!(message.contains("seq")),
            other => panic!("expected schema violation, got {other:?}"),
        }
    }

    #[test]
    fn test_encode_rejects_invalid_event() {
        assert!(JsonCodec::encode(&Ping { seq: 0 }).is_err());
        assert_eq!(JsonCodec::encode(&Ping { seq: 3 }).unwrap(), br#"{"seq":3}"#);
    }
}
