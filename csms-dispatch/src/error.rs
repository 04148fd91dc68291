//! Error types for dispatch, decoding and handlers

use serde_json::Value;
use thiserror::Error;

use crate::ocpp::{ErrorCode, ProtocolVersion};

/// Failure to turn bytes or a JSON value into a typed message
///
/// A failed decode never yields a partially populated value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("type mismatch: {detail}")]
    TypeMismatch { detail: String },

    #[error("malformed envelope: {0}")]
    Malformed(String),
}

impl DecodeError {
    pub fn malformed(detail: impl Into<String>) -> Self {
        DecodeError::Malformed(detail.into())
    }

    /// CALLERROR code sent back when an inbound payload fails to decode
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DecodeError::MissingField { .. } => ErrorCode::OccurenceConstraintViolation,
            DecodeError::TypeMismatch { .. } => ErrorCode::TypeConstraintViolation,
            DecodeError::Malformed(_) => ErrorCode::FormationViolation,
        }
    }
}

/// Outcome error of a single call
///
/// Errors are per call: one device failing never affects calls to another.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DispatchError {
    #[error("action {action} is not supported for OCPP {version}")]
    UnsupportedAction {
        action: String,
        version: ProtocolVersion,
    },

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out waiting for response")]
    TimedOut,

    #[error("device answered with {code}: {description}")]
    Protocol {
        code: ErrorCode,
        description: String,
        details: Value,
    },

    #[error("call cancelled")]
    Cancelled,

    #[error("unknown device: {0}")]
    UnknownDevice(String),

    #[error("call id {0} is still in use on this session")]
    CallIdInUse(String),

    #[error("encode error: {0}")]
    Encode(String),
}

impl DispatchError {
    pub fn unsupported(action: impl Into<String>, version: ProtocolVersion) -> Self {
        DispatchError::UnsupportedAction {
            action: action.into(),
            version,
        }
    }

    pub fn transport(detail: impl std::fmt::Display) -> Self {
        DispatchError::Transport(detail.to_string())
    }

    /// CALLERROR code reported to a device when an inbound call fails with this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            DispatchError::UnsupportedAction { .. } => ErrorCode::NotSupported,
            DispatchError::Decode(e) => e.error_code(),
            DispatchError::Protocol { code, .. } => *code,
            _ => ErrorCode::InternalError,
        }
    }
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Encode(e.to_string())
    }
}

/// Failure reported by an inbound action handler
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// Refuse the call with a specific CALLERROR code
    #[error("{code}: {description}")]
    Rejected { code: ErrorCode, description: String },

    /// Unexpected failure, reported as `InternalError`
    #[error("internal handler error: {0}")]
    Internal(String),
}

impl HandlerError {
    pub fn rejected(code: ErrorCode, description: impl Into<String>) -> Self {
        HandlerError::Rejected {
            code,
            description: description.into(),
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            HandlerError::Rejected { code, .. } => *code,
            HandlerError::Internal(_) => ErrorCode::InternalError,
        }
    }

    pub fn description(&self) -> String {
        match self {
            HandlerError::Rejected { description, .. } => description.clone(),
            HandlerError::Internal(detail) => detail.clone(),
        }
    }
}
