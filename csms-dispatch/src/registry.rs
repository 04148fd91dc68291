//! Schema registry
//!
//! Version-scoped table mapping wire action names to typed request/response
//! shapes. One map per protocol version, built once from the action tables
//! in `ocpp::v15` and `ocpp::v16` and read-only afterwards, so it is shared
//! through an `Arc` without locking.

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{v15, v16, OcppRequest, OcppResponse, ProtocolVersion};

/// Which side may send the CALL of an action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Initiator {
    ChargePoint,
    CentralSystem,
    Both,
}

impl Initiator {
    pub fn allows_central_system(self) -> bool {
        matches!(self, Initiator::CentralSystem | Initiator::Both)
    }

    pub fn allows_charge_point(self) -> bool {
        matches!(self, Initiator::ChargePoint | Initiator::Both)
    }
}

type RequestDecoder = fn(Value) -> Result<OcppRequest, DecodeError>;
type ResponseDecoder = fn(Value) -> Result<OcppResponse, DecodeError>;

/// Typed request shape of one `(action, version)`
#[derive(Clone, Copy)]
pub struct RequestShape {
    pub name: &'static str,
    decoder: RequestDecoder,
}

impl RequestShape {
    pub fn new(name: &'static str, decoder: RequestDecoder) -> Self {
        Self { name, decoder }
    }

    pub fn decode(&self, payload: Value) -> Result<OcppRequest, DecodeError> {
        (self.decoder)(payload)
    }
}

impl fmt::Debug for RequestShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RequestShape").field(&self.name).finish()
    }
}

impl PartialEq for RequestShape {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Typed response shape of one `(action, version)`
#[derive(Clone, Copy)]
pub struct ResponseShape {
    pub name: &'static str,
    decoder: ResponseDecoder,
}

impl ResponseShape {
    pub fn new(name: &'static str, decoder: ResponseDecoder) -> Self {
        Self { name, decoder }
    }

    pub fn decode(&self, payload: Value) -> Result<OcppResponse, DecodeError> {
        (self.decoder)(payload)
    }
}

impl fmt::Debug for ResponseShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResponseShape").field(&self.name).finish()
    }
}

impl PartialEq for ResponseShape {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Registry entry, unique per `(action, version)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionDescriptor {
    pub action: &'static str,
    pub version: ProtocolVersion,
    pub initiator: Initiator,
    pub request: RequestShape,
    pub response: ResponseShape,
}

/// Wire action and expected response shape derived from a request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionResponsePair {
    pub action: &'static str,
    pub response: ResponseShape,
}

/// Per-version action table
#[derive(Debug)]
pub struct SchemaRegistry {
    v15: HashMap<&'static str, ActionDescriptor>,
    v16: HashMap<&'static str, ActionDescriptor>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            v15: index(v15::descriptors()),
            v16: index(v16::descriptors()),
        }
    }

    fn table(&self, version: ProtocolVersion) -> &HashMap<&'static str, ActionDescriptor> {
        match version {
            ProtocolVersion::V15 => &self.v15,
            ProtocolVersion::V16 => &self.v16,
        }
    }

    pub fn descriptor(&self, action: &str, version: ProtocolVersion) -> Option<&ActionDescriptor> {
        self.table(version).get(action)
    }

    /// All descriptors of a version, sorted by action name
    pub fn descriptors(&self, version: ProtocolVersion) -> Vec<&ActionDescriptor> {
        let mut all: Vec<_> = self.table(version).values().collect();
        all.sort_by_key(|d| d.action);
        all
    }

    /// Request shape for an inbound CALL
    ///
    /// Actions only the central system may initiate are not accepted from a
    /// charge point.
    pub fn resolve_request_shape(
        &self,
        action: &str,
        version: ProtocolVersion,
    ) -> Result<RequestShape, DispatchError> {
        self.descriptor(action, version)
            .filter(|d| d.initiator.allows_charge_point())
            .map(|d| d.request)
            .ok_or_else(|| DispatchError::unsupported(action, version))
    }

    /// Action name and response shape for an outbound request
    ///
    /// The request's own version must match the target version; a 1.5 shape
    /// is never sent to a 1.6 device or the other way round.
    pub fn resolve_action_and_response_shape(
        &self,
        request: &OcppRequest,
        version: ProtocolVersion,
    ) -> Result<ActionResponsePair, DispatchError> {
        let action = request.action();
        if request.version() != version {
            return Err(DispatchError::unsupported(action, version));
        }
        self.descriptor(action, version)
            .filter(|d| d.initiator.allows_central_system())
            .map(|d| ActionResponsePair {
                action: d.action,
                response: d.response,
            })
            .ok_or_else(|| DispatchError::unsupported(action, version))
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn index(descriptors: Vec<ActionDescriptor>) -> HashMap<&'static str, ActionDescriptor> {
    descriptors.into_iter().map(|d| (d.action, d)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_counts() {
        let registry = SchemaRegistry::new();
        assert_eq!(registry.descriptors(ProtocolVersion::V15).len(), 24);
        assert_eq!(registry.descriptors(ProtocolVersion::V16).len(), 28);
    }

    #[test]
    fn test_v16_only_actions() {
        let registry = SchemaRegistry::new();
        for action in ["TriggerMessage", "SetChargingProfile", "ClearChargingProfile", "GetCompositeSchedule"] {
            assert!(registry.descriptor(action, ProtocolVersion::V16).is_some());
            assert!(registry.descriptor(action, ProtocolVersion::V15).is_none());
        }
    }

    #[test]
    fn test_inbound_resolution_respects_initiator() {
        let registry = SchemaRegistry::new();
        let shape = registry
            .resolve_request_shape("Heartbeat", ProtocolVersion::V16)
            .unwrap();
        assert_eq!(shape.name, "HeartbeatRequest");
        assert!(shape.decode(json!({})).is_ok());

        // Devices never send ReserveNow
        assert!(matches!(
            registry.resolve_request_shape("ReserveNow", ProtocolVersion::V16),
            Err(DispatchError::UnsupportedAction { .. })
        ));
        // DataTransfer goes both ways
        assert!(registry.resolve_request_shape("DataTransfer", ProtocolVersion::V15).is_ok());
    }

    #[test]
    fn test_outbound_resolution() {
        let registry = SchemaRegistry::new();
        let request: OcppRequest = v16::ClearCacheRequest {}.into();
        let pair = registry
            .resolve_action_and_response_shape(&request, ProtocolVersion::V16)
            .unwrap();
        assert_eq!(pair.action, "ClearCache");
        assert_eq!(pair.response.name, "ClearCacheResponse");

        // Heartbeat is only ever sent by charge points
        let request: OcppRequest = v16::HeartbeatRequest {}.into();
        assert!(registry
            .resolve_action_and_response_shape(&request, ProtocolVersion::V16)
            .is_err());
    }

    #[test]
    fn test_response_shape_decodes_typed_value() {
        let registry = SchemaRegistry::new();
        let descriptor = registry.descriptor("ReserveNow", ProtocolVersion::V15).unwrap();
        let response = descriptor.response.decode(json!({"status": "Occupied"})).unwrap();
        assert_eq!(response.version(), ProtocolVersion::V15);
        assert_eq!(response.shape(), "ReserveNowResponse");
    }
}
