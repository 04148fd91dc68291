//! Strict payload decoding
//!
//! Unknown fields are ignored, absent required fields and wrong value types
//! are reported separately so the inbound path can answer with the matching
//! OCPP constraint violation.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{DecodeError, DispatchError};

/// Decode a payload into the shape `T`
pub fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, DecodeError> {
    serde_json::from_value(payload).map_err(classify)
}

/// Encode a typed value into a payload
pub fn encode<T: Serialize>(value: &T) -> Result<Value, DispatchError> {
    serde_json::to_value(value).map_err(|e| DispatchError::Encode(e.to_string()))
}

fn classify(err: serde_json::Error) -> DecodeError {
    let message = err.to_string();
    match missing_field_name(&message) {
        Some(field) => DecodeError::MissingField { field },
        None => DecodeError::TypeMismatch { detail: message },
    }
}

// serde reports absent fields as "missing field `name`"
fn missing_field_name(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let end = rest.find('`')?;
    Some(rest[..end].to_string())
}
