//! Transport adapters
//!
//! One capability set implemented twice:
//! - `websocket`: OCPP-J persistent connections, full duplex
//! - `document`: synchronous document exchange, one round trip per call
//!
//! Adapters only move envelopes. Everything above framing (registry lookups,
//! correlation, handlers) happens behind the [`FrameSink`] the dispatcher
//! registers with each adapter.

pub mod connection;
pub mod document;
pub mod websocket;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::codec::EnvelopeError;
use crate::error::DispatchError;
use crate::ocpp::{ErrorCode, ProtocolVersion, WireMessage};

pub use connection::{Connection, Liveness};
pub use document::{DocumentAdapter, DocumentExchange, HttpExchange};
pub use websocket::WebSocketAdapter;

/// Transport a device is reached over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Request/response document exchange
    Document,
    /// OCPP-J over WebSocket
    WebSocket,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Document => write!(f, "document"),
            TransportKind::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Identity tag used by persistent connections
pub const NO_ENDPOINT: &str = "-";

/// Addressing tuple for one device over one transport and protocol version
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceSelector {
    pub transport_kind: TransportKind,
    pub device_id: String,
    pub protocol_version: ProtocolVersion,
    /// Endpoint URL for document exchange, `-` for persistent connections
    pub identity_tag: String,
}

impl DeviceSelector {
    pub fn websocket(device_id: impl Into<String>, version: ProtocolVersion) -> Self {
        Self {
            transport_kind: TransportKind::WebSocket,
            device_id: device_id.into(),
            protocol_version: version,
            identity_tag: NO_ENDPOINT.to_string(),
        }
    }

    pub fn document(
        device_id: impl Into<String>,
        version: ProtocolVersion,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            transport_kind: TransportKind::Document,
            device_id: device_id.into(),
            protocol_version: version,
            identity_tag: endpoint.into(),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}@ocpp{}",
            self.transport_kind, self.device_id, self.protocol_version
        )
    }
}

static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// One persistent connection or one document exchange
///
/// Call ids are scoped to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        SessionId(NEXT_SESSION.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Where an inbound envelope came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOrigin {
    pub session: SessionId,
    pub device_id: String,
    pub version: ProtocolVersion,
    pub transport: TransportKind,
}

/// Receiver of decoded envelopes
#[async_trait]
pub trait FrameSink: Send + Sync {
    /// Handle one inbound envelope; returns the reply for inbound CALLs
    async fn on_frame(&self, origin: &FrameOrigin, message: WireMessage) -> Option<WireMessage>;

    /// A session ended; calls still pending on it can never be answered
    async fn on_disconnect(&self, session: SessionId, device_id: &str);
}

/// Capability set shared by both transports
#[async_trait]
pub trait TransportAdapter: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Session the next call to this selector is sent on
    async fn open_session(&self, selector: &DeviceSelector) -> Result<SessionId, DispatchError>;

    async fn send(
        &self,
        selector: &DeviceSelector,
        session: SessionId,
        message: WireMessage,
    ) -> Result<(), DispatchError>;

    fn on_receive(&self, sink: Arc<dyn FrameSink>);

    /// Whether `send` returns only after the response was delivered
    ///
    /// Sends of synchronous adapters run on a task of their own and are cut
    /// off at the call deadline.
    fn is_synchronous(&self) -> bool {
        false
    }

    /// Snapshot of a persistent connection, if this transport keeps any
    fn connection(&self, _device_id: &str) -> Option<Connection> {
        None
    }
}

/// CALLERROR answering an envelope that could not be decoded, if answerable
pub(crate) fn formation_violation(err: &EnvelopeError) -> Option<WireMessage> {
    err.call_id
        .as_ref()
        .map(|id| WireMessage::error(id.clone(), ErrorCode::FormationViolation, err.error.to_string()))
}
