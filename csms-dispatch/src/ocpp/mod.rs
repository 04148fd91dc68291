//! OCPP protocol layer
//!
//! Typed payloads for both supported protocol versions and the wire-neutral
//! message model shared by the transports:
//! - `types`: data types common to OCPP 1.5 and 1.6
//! - `v15`: OCPP 1.5 request/response shapes
//! - `v16`: OCPP 1.6 request/response shapes
//! - `messages`: CALL, CALLRESULT, CALLERROR independent of framing
//!
//! Each version module declares its action table with [`ocpp_actions!`]. The
//! table produces a per-version `Request`/`Response` enum, the registry
//! descriptors, and the conversions that give every request struct its
//! statically known response type through [`OcppCall`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[macro_use]
mod macros;

pub mod messages;
pub mod types;
pub mod v15;
pub mod v16;

pub use messages::*;
pub use types::*;

/// Negotiated OCPP protocol version
///
/// Attached to a connection (or a document exchange) when it is established
/// and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProtocolVersion {
    /// OCPP 1.5 (legacy)
    #[serde(rename = "ocpp1.5")]
    V15,
    /// OCPP 1.6 (current)
    #[serde(rename = "ocpp1.6")]
    V16,
}

impl ProtocolVersion {
    pub const ALL: [ProtocolVersion; 2] = [ProtocolVersion::V15, ProtocolVersion::V16];

    /// WebSocket subprotocol token used during the OCPP-J handshake
    pub fn subprotocol(self) -> &'static str {
        match self {
            ProtocolVersion::V15 => "ocpp1.5",
            ProtocolVersion::V16 => "ocpp1.6",
        }
    }

    /// Namespace of documents addressed to the central system
    pub fn central_system_namespace(self) -> &'static str {
        match self {
            ProtocolVersion::V15 => "urn://Ocpp/Cs/2012/06/",
            ProtocolVersion::V16 => "urn://Ocpp/Cs/2015/10/",
        }
    }

    /// Namespace of documents addressed to a charge point
    pub fn charge_point_namespace(self) -> &'static str {
        match self {
            ProtocolVersion::V15 => "urn://Ocpp/Cp/2012/06/",
            ProtocolVersion::V16 => "urn://Ocpp/Cp/2015/10/",
        }
    }

    /// Resolve a version from a document namespace (either direction)
    pub fn from_namespace(namespace: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| {
            v.central_system_namespace() == namespace || v.charge_point_namespace() == namespace
        })
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolVersion::V15 => write!(f, "1.5"),
            ProtocolVersion::V16 => write!(f, "1.6"),
        }
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1.5" | "ocpp1.5" | "v15" => Ok(ProtocolVersion::V15),
            "1.6" | "ocpp1.6" | "v16" => Ok(ProtocolVersion::V16),
            other => Err(format!("unknown OCPP version: {}", other)),
        }
    }
}

/// A typed request of either protocol version
#[derive(Debug, Clone, PartialEq)]
pub enum OcppRequest {
    V15(v15::Request),
    V16(v16::Request),
}

impl OcppRequest {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            OcppRequest::V15(_) => ProtocolVersion::V15,
            OcppRequest::V16(_) => ProtocolVersion::V16,
        }
    }

    /// Wire action name of this request
    pub fn action(&self) -> &'static str {
        match self {
            OcppRequest::V15(r) => r.action(),
            OcppRequest::V16(r) => r.action(),
        }
    }

    /// Name of the request shape, e.g. `ReserveNowRequest`
    pub fn shape(&self) -> &'static str {
        match self {
            OcppRequest::V15(r) => r.shape(),
            OcppRequest::V16(r) => r.shape(),
        }
    }

    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            OcppRequest::V15(r) => r.to_payload(),
            OcppRequest::V16(r) => r.to_payload(),
        }
    }
}

/// A typed response of either protocol version
#[derive(Debug, Clone, PartialEq)]
pub enum OcppResponse {
    V15(v15::Response),
    V16(v16::Response),
}

impl OcppResponse {
    pub fn version(&self) -> ProtocolVersion {
        match self {
            OcppResponse::V15(_) => ProtocolVersion::V15,
            OcppResponse::V16(_) => ProtocolVersion::V16,
        }
    }

    /// Name of the response shape, e.g. `ReserveNowResponse`
    pub fn shape(&self) -> &'static str {
        match self {
            OcppResponse::V15(r) => r.shape(),
            OcppResponse::V16(r) => r.shape(),
        }
    }

    pub fn to_payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            OcppResponse::V15(r) => r.to_payload(),
            OcppResponse::V16(r) => r.to_payload(),
        }
    }
}

/// A request struct with a statically known action, version and response
///
/// Implemented for every request shape by the version action tables.
pub trait OcppCall:
    Into<OcppRequest> + TryFrom<OcppRequest, Error = OcppRequest> + Send + 'static
{
    const ACTION: &'static str;
    const VERSION: ProtocolVersion;

    type Response: Into<OcppResponse> + TypedResponse + Send + 'static;
}

/// Extraction of a concrete response type from [`OcppResponse`]
///
/// Implemented for every response shape and for `OcppResponse` itself.
pub trait TypedResponse: Sized {
    fn from_response(response: OcppResponse) -> Result<Self, OcppResponse>;
}

impl TypedResponse for OcppResponse {
    fn from_response(response: OcppResponse) -> Result<Self, OcppResponse> {
        Ok(response)
    }
}
