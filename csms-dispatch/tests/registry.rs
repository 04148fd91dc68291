//! Registry and payload codec behaviour across both protocol versions

use csms_dispatch::error::{DecodeError, DispatchError};
use csms_dispatch::ocpp::{v15, v16, OcppRequest, ProtocolVersion, ResetType};
use csms_dispatch::registry::{Initiator, SchemaRegistry};
use serde_json::{json, Value};

/// Representative (request, response) payloads per action
fn samples(version: ProtocolVersion) -> Vec<(&'static str, Value, Value)> {
    let mut common = vec![
        ("Authorize", json!({"idTag": "TAG-1"}), json!({"idTagInfo": {"status": "Accepted"}})),
        ("CancelReservation", json!({"reservationId": 3}), json!({"status": "Rejected"})),
        (
            "ChangeAvailability",
            json!({"connectorId": 0, "type": "Inoperative"}),
            json!({"status": "Scheduled"}),
        ),
        (
            "ChangeConfiguration",
            json!({"key": "HeartbeatInterval", "value": "120"}),
            json!({"status": "Accepted"}),
        ),
        ("ClearCache", json!({}), json!({"status": "Accepted"})),
        (
            "DataTransfer",
            json!({"vendorId": "com.example", "messageId": "m", "data": "x"}),
            json!({"status": "Accepted", "data": "y"}),
        ),
        ("GetLocalListVersion", json!({}), json!({"listVersion": 4})),
        ("Heartbeat", json!({}), json!({"currentTime": "2026-10-19T08:00:00Z"})),
        ("RemoteStopTransaction", json!({"transactionId": 99}), json!({"status": "Accepted"})),
        (
            "ReserveNow",
            json!({
                "connectorId": 1,
                "expiryDate": "2026-10-20T18:30:00Z",
                "idTag": "TAG-1",
                "reservationId": 7
            }),
            json!({"status": "Accepted"}),
        ),
        ("Reset", json!({"type": "Soft"}), json!({"status": "Accepted"})),
        (
            "UpdateFirmware",
            json!({"location": "ftp://fw.example/ek3.bin", "retrieveDate": "2026-10-21T02:00:00Z", "retries": 3}),
            json!({}),
        ),
    ];

    let specific = match version {
        ProtocolVersion::V15 => vec![
            (
                "BootNotification",
                json!({"chargePointVendor": "EK", "chargePointModel": "EK3"}),
                json!({"status": "Accepted", "currentTime": "2026-10-19T08:00:00Z", "heartbeatInterval": 300}),
            ),
            (
                "StatusNotification",
                json!({"connectorId": 1, "status": "Occupied", "errorCode": "NoError"}),
                json!({}),
            ),
            ("UnlockConnector", json!({"connectorId": 2}), json!({"status": "Accepted"})),
            (
                "SendLocalList",
                json!({"listVersion": 5, "localAuthorisationList": [{"idTag": "TAG-1"}], "updateType": "Full"}),
                json!({"status": "Accepted", "hash": "abc"}),
            ),
            (
                "MeterValues",
                json!({"connectorId": 1, "values": [{"timestamp": "2026-10-19T08:00:00Z", "value": [{"value": "1200"}]}]}),
                json!({}),
            ),
        ],
        ProtocolVersion::V16 => vec![
            (
                "BootNotification",
                json!({"chargePointVendor": "EK", "chargePointModel": "EK3"}),
                json!({"status": "Pending", "currentTime": "2026-10-19T08:00:00Z", "interval": 300}),
            ),
            (
                "StatusNotification",
                json!({"connectorId": 1, "errorCode": "NoError", "status": "Charging"}),
                json!({}),
            ),
            ("UnlockConnector", json!({"connectorId": 2}), json!({"status": "Unlocked"})),
            (
                "TriggerMessage",
                json!({"requestedMessage": "StatusNotification", "connectorId": 1}),
                json!({"status": "Accepted"}),
            ),
            (
                "SetChargingProfile",
                json!({
                    "connectorId": 1,
                    "csChargingProfiles": {
                        "chargingProfileId": 11,
                        "stackLevel": 0,
                        "chargingProfilePurpose": "TxDefaultProfile",
                        "chargingProfileKind": "Absolute",
                        "chargingSchedule": {
                            "chargingRateUnit": "A",
                            "chargingSchedulePeriod": [{"startPeriod": 0, "limit": 16.5}]
                        }
                    }
                }),
                json!({"status": "Accepted"}),
            ),
            (
                "ClearChargingProfile",
                json!({"id": 11}),
                json!({"status": "Unknown"}),
            ),
            (
                "GetCompositeSchedule",
                json!({"connectorId": 1, "duration": 3600}),
                json!({"status": "Rejected"}),
            ),
            (
                "MeterValues",
                json!({"connectorId": 1, "meterValue": [{"timestamp": "2026-10-19T08:00:00Z", "sampledValue": [{"value": "1200"}]}]}),
                json!({}),
            ),
        ],
    };

    common.extend(specific);
    common
}

#[test]
fn test_payloads_survive_decode_and_encode() {
    let registry = SchemaRegistry::new();
    for version in ProtocolVersion::ALL {
        for (action, request, response) in samples(version) {
            let descriptor = registry
                .descriptor(action, version)
                .unwrap_or_else(|| panic!("{} missing for {}", action, version));

            let typed = descriptor.request.decode(request.clone()).unwrap();
            assert_eq!(typed.action(), action);
            assert_eq!(typed.version(), version);
            assert_eq!(typed.to_payload().unwrap(), request, "{} request ({})", action, version);

            let typed = descriptor.response.decode(response.clone()).unwrap();
            assert_eq!(typed.version(), version);
            assert_eq!(typed.to_payload().unwrap(), response, "{} response ({})", action, version);
        }
    }
}

#[test]
fn test_every_descriptor_is_self_consistent() {
    let registry = SchemaRegistry::new();
    for version in ProtocolVersion::ALL {
        for descriptor in registry.descriptors(version) {
            assert_eq!(descriptor.version, version);
            assert_eq!(descriptor.request.name, format!("{}Request", descriptor.action));
            assert_eq!(descriptor.response.name, format!("{}Response", descriptor.action));
        }
    }
}

#[test]
fn test_initiators() {
    let registry = SchemaRegistry::new();
    let initiator = |action, version| registry.descriptor(action, version).unwrap().initiator;

    assert_eq!(initiator("Heartbeat", ProtocolVersion::V16), Initiator::ChargePoint);
    assert_eq!(initiator("ReserveNow", ProtocolVersion::V15), Initiator::CentralSystem);
    assert_eq!(initiator("DataTransfer", ProtocolVersion::V16), Initiator::Both);
}

#[test]
fn test_cross_version_requests_are_unsupported() {
    let registry = SchemaRegistry::new();

    let trigger: OcppRequest = v16::TriggerMessageRequest {
        requested_message: v16::MessageTrigger::Heartbeat,
        connector_id: None,
    }
    .into();
    let err = registry
        .resolve_action_and_response_shape(&trigger, ProtocolVersion::V15)
        .unwrap_err();
    assert_eq!(
        err,
        DispatchError::UnsupportedAction {
            action: "TriggerMessage".into(),
            version: ProtocolVersion::V15,
        }
    );

    // Same action name in both versions, still not interchangeable
    let reset: OcppRequest = v15::ResetRequest {
        reset_type: ResetType::Hard,
    }
    .into();
    assert!(matches!(
        registry.resolve_action_and_response_shape(&reset, ProtocolVersion::V16),
        Err(DispatchError::UnsupportedAction { .. })
    ));
    assert!(registry
        .resolve_action_and_response_shape(&reset, ProtocolVersion::V15)
        .is_ok());
}

#[test]
fn test_missing_field_never_yields_partial_value() {
    let registry = SchemaRegistry::new();
    let shape = registry.descriptor("ReserveNow", ProtocolVersion::V16).unwrap().request;

    let err = shape
        .decode(json!({"connectorId": 1, "idTag": "TAG-1", "reservationId": 7}))
        .unwrap_err();
    assert_eq!(
        err,
        DecodeError::MissingField {
            field: "expiryDate".into()
        }
    );
}

#[test]
fn test_wrong_types_are_type_mismatches() {
    let registry = SchemaRegistry::new();
    let shape = registry.descriptor("UnlockConnector", ProtocolVersion::V15).unwrap().response;

    // "Unlocked" only exists in 1.6
    assert!(matches!(
        shape.decode(json!({"status": "Unlocked"})),
        Err(DecodeError::TypeMismatch { .. })
    ));
    assert!(matches!(
        shape.decode(json!({"status": 1})),
        Err(DecodeError::TypeMismatch { .. })
    ));
}
