//! Codec layer
//!
//! Envelope and payload are decoded in two independent steps:
//! - `json_rpc` / `document`: envelope framing per transport
//! - `payload`: strict conversion between JSON payloads and typed shapes
//!
//! An envelope codec only ever produces a [`WireMessage`]; interpreting the
//! payload requires the registry shape for `(action, version)`.

pub mod document;
pub mod json_rpc;
pub mod payload;

use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{CallId, ProtocolVersion, WireMessage};
use crate::transport::TransportKind;

pub use document::DocumentCodec;
pub use json_rpc::JsonRpcCodec;

/// Addressing information carried alongside an envelope
///
/// JSON-RPC frames carry none (the connection identifies the device);
/// documents carry the device identity, a namespace and the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub device_id: String,
    pub version: ProtocolVersion,
    /// Action the envelope belongs to, required by documents for responses
    pub action: Option<String>,
}

impl Route {
    pub fn new(device_id: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            device_id: device_id.into(),
            version,
            action: None,
        }
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }
}

/// Envelope decoded from raw bytes
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub message: WireMessage,
    pub route: Option<Route>,
}

/// Envelope-level decode failure
///
/// `call_id` is set when the bytes were recognisably a CALL whose id could be
/// recovered, so the receiver can still answer with a CALLERROR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeError {
    pub call_id: Option<CallId>,
    pub error: DecodeError,
}

impl EnvelopeError {
    pub fn new(error: DecodeError) -> Self {
        Self { call_id: None, error }
    }

    pub fn for_call(call_id: impl Into<CallId>, error: DecodeError) -> Self {
        Self {
            call_id: Some(call_id.into()),
            error,
        }
    }
}

impl std::fmt::Display for EnvelopeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.call_id {
            Some(id) => write!(f, "{} (call {})", self.error, id),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Envelope framing of one transport
pub trait EnvelopeCodec: Send + Sync {
    fn encode(&self, message: &WireMessage, route: &Route) -> Result<Vec<u8>, DispatchError>;

    fn decode(&self, bytes: &[u8]) -> Result<Decoded, EnvelopeError>;
}

static JSON_RPC: JsonRpcCodec = JsonRpcCodec;
static DOCUMENT: DocumentCodec = DocumentCodec::central_system();

/// The central system's codec for a transport
pub fn codec_for(kind: TransportKind) -> &'static dyn EnvelopeCodec {
    match kind {
        TransportKind::WebSocket => &JSON_RPC,
        TransportKind::Document => &DOCUMENT,
    }
}

/// Encode a message with the framing of `kind`
pub fn encode(message: &WireMessage, kind: TransportKind, route: &Route) -> Result<Vec<u8>, DispatchError> {
    codec_for(kind).encode(message, route)
}

/// Decode an envelope with the framing of `kind`
pub fn decode(bytes: &[u8], kind: TransportKind) -> Result<Decoded, EnvelopeError> {
    codec_for(kind).decode(bytes)
}
