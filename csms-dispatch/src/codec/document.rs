//! Document-exchange envelope
//!
//! A request/response document modelled on the SOAP header/body split:
//!
//! ```text
//! {
//!   "header": {"namespace", "chargeBoxIdentity", "action", "messageId", "relatesTo"?},
//!   "body"?: payload,
//!   "fault"?: {"code", "description", "details"?}
//! }
//! ```
//!
//! The namespace identifies the protocol version and the service the
//! document belongs to. A document carrying `relatesTo` answers an earlier
//! request: with a fault it is a CALLERROR, otherwise a CALLRESULT.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{Decoded, EnvelopeCodec, EnvelopeError, Route};
use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{ErrorCode, ProtocolVersion, WireMessage};

/// Which side of the exchange encodes documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    CentralSystem,
    ChargePoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Header {
    namespace: String,
    charge_box_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<String>,
    message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    relates_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Fault {
    code: String,
    #[serde(default)]
    description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Document {
    header: Header,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fault: Option<Fault>,
}

/// Codec for document exchanges
#[derive(Debug, Clone, Copy)]
pub struct DocumentCodec {
    side: Side,
}

impl DocumentCodec {
    /// Codec used by the central system
    pub const fn central_system() -> Self {
        Self {
            side: Side::CentralSystem,
        }
    }

    /// Codec used by a charge point (simulators and tests)
    pub const fn charge_point() -> Self {
        Self { side: Side::ChargePoint }
    }

    // Requests go to the peer's service, responses come from our own.
    fn namespace(&self, message: &WireMessage, version: ProtocolVersion) -> &'static str {
        let own_service = !message.is_call();
        match (self.side, own_service) {
            (Side::CentralSystem, true) | (Side::ChargePoint, false) => version.central_system_namespace(),
            (Side::CentralSystem, false) | (Side::ChargePoint, true) => version.charge_point_namespace(),
        }
    }
}

impl EnvelopeCodec for DocumentCodec {
    fn encode(&self, message: &WireMessage, route: &Route) -> Result<Vec<u8>, DispatchError> {
        let namespace = self.namespace(message, route.version).to_string();
        let charge_box_identity = route.device_id.clone();

        let document = match message {
            WireMessage::Call { call_id, action, payload } => Document {
                header: Header {
                    namespace,
                    charge_box_identity,
                    action: Some(action.clone()),
                    message_id: call_id.clone(),
                    relates_to: None,
                },
                body: Some(payload.clone()),
                fault: None,
            },
            WireMessage::CallResult { call_id, payload } => Document {
                header: Header {
                    namespace,
                    charge_box_identity,
                    action: route.action.clone(),
                    message_id: Uuid::new_v4().to_string(),
                    relates_to: Some(call_id.clone()),
                },
                body: Some(payload.clone()),
                fault: None,
            },
            WireMessage::CallError {
                call_id,
                code,
                description,
                details,
            } => Document {
                header: Header {
                    namespace,
                    charge_box_identity,
                    action: route.action.clone(),
                    message_id: Uuid::new_v4().to_string(),
                    relates_to: Some(call_id.clone()),
                },
                body: None,
                fault: Some(Fault {
                    code: code.as_str().to_string(),
                    description: description.clone(),
                    details: Some(details.clone()),
                }),
            },
        };

        Ok(serde_json::to_vec(&document)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Decoded, EnvelopeError> {
        self.parse(bytes).map(|(decoded, _)| decoded)
    }
}

impl DocumentCodec {
    /// Decode a document, keeping the namespace it was sent in
    fn parse(&self, bytes: &[u8]) -> Result<(Decoded, String), EnvelopeError> {
        let raw: Value = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::new(DecodeError::malformed(format!("invalid JSON: {}", e))))?;

        // A request whose header carries a message id can still be answered
        let recoverable_id = raw
            .get("header")
            .filter(|h| h.get("relatesTo").is_none())
            .and_then(|h| h.get("messageId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        let fail = |error: DecodeError| EnvelopeError {
            call_id: recoverable_id.clone(),
            error,
        };

        let document: Document = serde_json::from_value(raw)
            .map_err(|e| fail(DecodeError::malformed(format!("invalid document: {}", e))))?;
        let header = document.header;

        let namespace = header.namespace;
        let version = ProtocolVersion::from_namespace(&namespace)
            .ok_or_else(|| fail(DecodeError::malformed(format!("unknown namespace {}", namespace))))?;

        let message = match header.relates_to {
            None => {
                let action = header
                    .action
                    .clone()
                    .ok_or_else(|| fail(DecodeError::malformed("request without action")))?;
                WireMessage::Call {
                    call_id: header.message_id,
                    action,
                    payload: document.body.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                }
            }
            Some(relates_to) => match document.fault {
                Some(fault) => WireMessage::CallError {
                    call_id: relates_to,
                    code: ErrorCode::from_wire(&fault.code),
                    description: fault.description,
                    details: fault.details.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                },
                None => WireMessage::CallResult {
                    call_id: relates_to,
                    payload: document.body.unwrap_or_else(|| Value::Object(serde_json::Map::new())),
                },
            },
        };

        let decoded = Decoded {
            message,
            route: Some(Route {
                device_id: header.charge_box_identity,
                version,
                action: header.action,
            }),
        };
        Ok((decoded, namespace))
    }

    /// Decode a document received by this side
    ///
    /// Fails unless the namespace matches the direction: requests must be
    /// addressed to our own service, responses must come from the peer's.
    pub fn decode_addressed(&self, bytes: &[u8]) -> Result<Decoded, EnvelopeError> {
        let (decoded, namespace) = self.parse(bytes)?;
        let version = decoded.route.as_ref().map(|r| r.version);
        let expected = version.map(|v| self.peer().namespace(&decoded.message, v));
        if expected != Some(namespace.as_str()) {
            let error = DecodeError::malformed(format!(
                "namespace {} is not addressed to this side (expected {})",
                namespace,
                expected.unwrap_or("-")
            ));
            return Err(match &decoded.message {
                WireMessage::Call { call_id, .. } => EnvelopeError::for_call(call_id.clone(), error),
                _ => EnvelopeError::new(error),
            });
        }
        Ok(decoded)
    }

    fn peer(&self) -> Self {
        match self.side {
            Side::CentralSystem => Self::charge_point(),
            Side::ChargePoint => Self::central_system(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_call_targets_charge_point_service() {
        let codec = DocumentCodec::central_system();
        let route = Route::new("CP-7", ProtocolVersion::V15);
        let bytes = codec
            .encode(&WireMessage::call("m-1", "ReserveNow", json!({"connectorId": 1})), &route)
            .unwrap();
        let doc: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(doc["header"]["namespace"], "urn://Ocpp/Cp/2012/06/");
        assert_eq!(doc["header"]["chargeBoxIdentity"], "CP-7");
        assert_eq!(doc["header"]["messageId"], "m-1");
        assert_eq!(doc["body"]["connectorId"], 1);
        assert!(doc["header"].get("relatesTo").is_none());
    }

    #[test]
    fn test_response_decodes_by_relates_to() {
        let bytes = serde_json::to_vec(&json!({
            "header": {
                "namespace": "urn://Ocpp/Cp/2015/10/",
                "chargeBoxIdentity": "CP-7",
                "action": "ReserveNow",
                "messageId": "r-1",
                "relatesTo": "m-1"
            },
            "body": {"status": "Accepted"}
        }))
        .unwrap();
        let decoded = DocumentCodec::central_system().decode(&bytes).unwrap();
        assert_eq!(decoded.message, WireMessage::result("m-1", json!({"status": "Accepted"})));

        let route = decoded.route.unwrap();
        assert_eq!(route.version, ProtocolVersion::V16);
        assert_eq!(route.device_id, "CP-7");
    }

    #[test]
    fn test_fault_becomes_call_error() {
        let device = DocumentCodec::charge_point();
        let route = Route::new("CP-7", ProtocolVersion::V16).with_action("Reset");
        let bytes = device
            .encode(&WireMessage::error("m-2", ErrorCode::NotSupported, "nope"), &route)
            .unwrap();

        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["header"]["namespace"], "urn://Ocpp/Cp/2015/10/");

        let decoded = DocumentCodec::central_system().decode(&bytes).unwrap();
        match decoded.message {
            WireMessage::CallError { call_id, code, description, .. } => {
                assert_eq!(call_id, "m-2");
                assert_eq!(code, ErrorCode::NotSupported);
                assert_eq!(description, "nope");
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_namespace_keeps_request_id() {
        let bytes = serde_json::to_vec(&json!({
            "header": {
                "namespace": "urn://Ocpp/Cs/2099/01/",
                "chargeBoxIdentity": "CP-7",
                "action": "Heartbeat",
                "messageId": "m-3"
            },
            "body": {}
        }))
        .unwrap();
        let err = DocumentCodec::central_system().decode(&bytes).unwrap_err();
        assert_eq!(err.call_id.as_deref(), Some("m-3"));
        assert!(matches!(err.error, DecodeError::Malformed(_)));
    }

    #[test]
    fn test_missing_header_is_malformed() {
        let err = DocumentCodec::central_system().decode(br#"{"body": {}}"#).unwrap_err();
        assert_eq!(err.call_id, None);
    }

    #[test]
    fn test_addressed_decode_checks_direction() {
        let route = Route::new("CP-7", ProtocolVersion::V15).with_action("Heartbeat");
        let to_central = DocumentCodec::charge_point()
            .encode(&WireMessage::call("h-1", "Heartbeat", json!({})), &route)
            .unwrap();
        let to_device = DocumentCodec::central_system()
            .encode(&WireMessage::call("h-2", "Heartbeat", json!({})), &route)
            .unwrap();

        let central = DocumentCodec::central_system();
        assert!(central.decode_addressed(&to_central).is_ok());
        let err = central.decode_addressed(&to_device).unwrap_err();
        assert_eq!(err.call_id.as_deref(), Some("h-2"));
        assert!(matches!(err.error, DecodeError::Malformed(_)));

        // A device answering from its own service is accepted
        let answer = DocumentCodec::charge_point()
            .encode(&WireMessage::result("h-2", json!({})), &route)
            .unwrap();
        assert!(central.decode_addressed(&answer).is_ok());
        assert!(DocumentCodec::charge_point().decode_addressed(&answer).is_err());
    }
}
