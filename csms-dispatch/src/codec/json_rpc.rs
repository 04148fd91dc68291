//! OCPP-J JSON-RPC framing
//!
//! - CALL: [2, callId, action, payload]
//! - CALLRESULT: [3, callId, payload]
//! - CALLERROR: [4, callId, errorCode, errorDescription, errorDetails]

use serde_json::Value;

use super::{Decoded, EnvelopeCodec, EnvelopeError, Route};
use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{ErrorCode, MessageType, WireMessage};

/// Codec for frames on a persistent connection
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRpcCodec;

impl JsonRpcCodec {
    pub fn to_value(message: &WireMessage) -> Value {
        match message {
            WireMessage::Call { call_id, action, payload } => serde_json::json!([
                MessageType::Call as i32,
                call_id,
                action,
                payload
            ]),
            WireMessage::CallResult { call_id, payload } => serde_json::json!([
                MessageType::CallResult as i32,
                call_id,
                payload
            ]),
            WireMessage::CallError {
                call_id,
                code,
                description,
                details,
            } => serde_json::json!([
                MessageType::CallError as i32,
                call_id,
                code.as_str(),
                description,
                details
            ]),
        }
    }

    pub fn parse(bytes: &[u8]) -> Result<WireMessage, EnvelopeError> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| EnvelopeError::new(DecodeError::malformed(format!("invalid JSON: {}", e))))?;

        let array = match value {
            Value::Array(array) => array,
            _ => return Err(EnvelopeError::new(DecodeError::malformed("frame is not an array"))),
        };

        let msg_type = array
            .first()
            .and_then(Value::as_i64)
            .ok_or_else(|| EnvelopeError::new(DecodeError::malformed("missing message type")))?;

        let call_id = array.get(1).and_then(Value::as_str).map(str::to_string);

        match MessageType::from_i64(msg_type) {
            Some(MessageType::Call) => {
                let call_id = call_id
                    .ok_or_else(|| EnvelopeError::new(DecodeError::malformed("missing call id")))?;
                if array.len() != 4 {
                    return Err(EnvelopeError::for_call(
                        call_id,
                        DecodeError::malformed(format!("CALL has {} elements, expected 4", array.len())),
                    ));
                }
                let action = match array[2].as_str() {
                    Some(action) => action.to_string(),
                    None => {
                        return Err(EnvelopeError::for_call(
                            call_id,
                            DecodeError::malformed("action is not a string"),
                        ))
                    }
                };
                Ok(WireMessage::Call {
                    call_id,
                    action,
                    payload: array[3].clone(),
                })
            }
            Some(MessageType::CallResult) => {
                let call_id = call_id
                    .ok_or_else(|| EnvelopeError::new(DecodeError::malformed("missing call id")))?;
                if array.len() != 3 {
                    return Err(EnvelopeError::new(DecodeError::malformed(format!(
                        "CALLRESULT has {} elements, expected 3",
                        array.len()
                    ))));
                }
                Ok(WireMessage::CallResult {
                    call_id,
                    payload: array[2].clone(),
                })
            }
            Some(MessageType::CallError) => {
                let call_id = call_id
                    .ok_or_else(|| EnvelopeError::new(DecodeError::malformed("missing call id")))?;
                if array.len() != 5 {
                    return Err(EnvelopeError::new(DecodeError::malformed(format!(
                        "CALLERROR has {} elements, expected 5",
                        array.len()
                    ))));
                }
                let code = array[2]
                    .as_str()
                    .map(ErrorCode::from_wire)
                    .unwrap_or(ErrorCode::GenericError);
                Ok(WireMessage::CallError {
                    call_id,
                    code,
                    description: array[3].as_str().unwrap_or("").to_string(),
                    details: array[4].clone(),
                })
            }
            None => Err(EnvelopeError::new(DecodeError::malformed(format!(
                "unknown message type {}",
                msg_type
            )))),
        }
    }
}

impl EnvelopeCodec for JsonRpcCodec {
    fn encode(&self, message: &WireMessage, _route: &Route) -> Result<Vec<u8>, DispatchError> {
        Ok(serde_json::to_vec(&Self::to_value(message))?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Decoded, EnvelopeError> {
        Ok(Decoded {
            message: Self::parse(bytes)?,
            route: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_serialization() {
        let call = WireMessage::call("msg-1", "ReserveNow", json!({"connectorId": 1}));
        let text = String::from_utf8(serde_json::to_vec(&JsonRpcCodec::to_value(&call)).unwrap()).unwrap();
        assert_eq!(text, r#"[2,"msg-1","ReserveNow",{"connectorId":1}]"#);
    }

    #[test]
    fn test_call_parsing() {
        let msg = JsonRpcCodec::parse(br#"[2, "msg-123", "Heartbeat", {}]"#).unwrap();
        assert_eq!(msg, WireMessage::call("msg-123", "Heartbeat", json!({})));
    }

    #[test]
    fn test_call_result_parsing() {
        let msg = JsonRpcCodec::parse(br#"[3, "msg-123", {"status": "Accepted"}]"#).unwrap();
        assert_eq!(msg, WireMessage::result("msg-123", json!({"status": "Accepted"})));
    }

    #[test]
    fn test_call_error_parsing() {
        let msg = JsonRpcCodec::parse(br#"[4, "msg-123", "NotImplemented", "Action not supported", {}]"#).unwrap();
        match msg {
            WireMessage::CallError { call_id, code, description, .. } => {
                assert_eq!(call_id, "msg-123");
                assert_eq!(code, ErrorCode::NotImplemented);
                assert_eq!(description, "Action not supported");
            }
            other => panic!("Expected CallError, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_error_code_is_generic() {
        let msg = JsonRpcCodec::parse(br#"[4, "m", "RpcFrameworkError", "", {}]"#).unwrap();
        assert!(matches!(msg, WireMessage::CallError { code: ErrorCode::GenericError, .. }));
    }

    #[test]
    fn test_malformed_call_keeps_call_id() {
        let err = JsonRpcCodec::parse(br#"[2, "msg-9", 17, {}]"#).unwrap_err();
        assert_eq!(err.call_id.as_deref(), Some("msg-9"));
        assert!(matches!(err.error, DecodeError::Malformed(_)));

        let err = JsonRpcCodec::parse(br#"[2, "msg-9", "Heartbeat"]"#).unwrap_err();
        assert_eq!(err.call_id.as_deref(), Some("msg-9"));
    }

    #[test]
    fn test_unrecoverable_frames() {
        let frames: [&[u8]; 5] = [b"not json", b"{}", b"[]", br#"[9, "x", {}]"#, br#"[3, "x"]"#];
        for bad in frames {
            let err = JsonRpcCodec::parse(bad).unwrap_err();
            assert_eq!(err.call_id, None, "frame {:?}", String::from_utf8_lossy(bad));
        }
    }
}
