//! Wire-neutral OCPP message model
//!
//! Both transports carry the same three kinds of message:
//! - CALL: a request identified by a call id and an action
//! - CALLRESULT: the successful answer to a CALL
//! - CALLERROR: the failed answer to a CALL
//!
//! Framing lives in `codec`; this module only knows the content.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier correlating a CALL with its answer, unique per session
pub type CallId = String;

/// OCPP-J message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 2,
    CallResult = 3,
    CallError = 4,
}

impl MessageType {
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            2 => Some(MessageType::Call),
            3 => Some(MessageType::CallResult),
            4 => Some(MessageType::CallError),
            _ => None,
        }
    }
}

/// OCPP 1.5/1.6 CALLERROR codes
///
/// `OccurenceConstraintViolation` keeps the misspelling used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotImplemented => "NotImplemented",
            ErrorCode::NotSupported => "NotSupported",
            ErrorCode::InternalError => "InternalError",
            ErrorCode::ProtocolError => "ProtocolError",
            ErrorCode::SecurityError => "SecurityError",
            ErrorCode::FormationViolation => "FormationViolation",
            ErrorCode::PropertyConstraintViolation => "PropertyConstraintViolation",
            ErrorCode::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            ErrorCode::TypeConstraintViolation => "TypeConstraintViolation",
            ErrorCode::GenericError => "GenericError",
        }
    }

    /// Parse a wire error code; unknown codes collapse to `GenericError`
    pub fn from_wire(code: &str) -> Self {
        serde_json::from_value(Value::String(code.to_string())).unwrap_or(ErrorCode::GenericError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded envelope whose payload has not been interpreted yet
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Call {
        call_id: CallId,
        action: String,
        payload: Value,
    },
    CallResult {
        call_id: CallId,
        payload: Value,
    },
    CallError {
        call_id: CallId,
        code: ErrorCode,
        description: String,
        details: Value,
    },
}

impl WireMessage {
    pub fn call(call_id: impl Into<CallId>, action: impl Into<String>, payload: Value) -> Self {
        WireMessage::Call {
            call_id: call_id.into(),
            action: action.into(),
            payload,
        }
    }

    pub fn result(call_id: impl Into<CallId>, payload: Value) -> Self {
        WireMessage::CallResult {
            call_id: call_id.into(),
            payload,
        }
    }

    /// CALLERROR with empty details
    pub fn error(call_id: impl Into<CallId>, code: ErrorCode, description: impl Into<String>) -> Self {
        WireMessage::CallError {
            call_id: call_id.into(),
            code,
            description: description.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    pub fn call_id(&self) -> &str {
        match self {
            WireMessage::Call { call_id, .. }
            | WireMessage::CallResult { call_id, .. }
            | WireMessage::CallError { call_id, .. } => call_id,
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            WireMessage::Call { .. } => MessageType::Call,
            WireMessage::CallResult { .. } => MessageType::CallResult,
            WireMessage::CallError { .. } => MessageType::CallError,
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, WireMessage::Call { .. })
    }
}
