//! Connector reservation helper for administrative front ends
//!
//! Takes the loosely typed parameters an operator form or REST call provides,
//! picks the request shape matching the device's protocol version and sends
//! a ReserveNow.

use chrono::{NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::info;

use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{v15, v16, OcppRequest, ProtocolVersion};
use crate::router::{CallHandle, Dispatcher};

/// Format of `expiry` in [`ReserveNowParams`]
pub const EXPIRY_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Reservation parameters as submitted by an operator
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReserveNowParams {
    /// Expiry in UTC, `YYYY-MM-dd HH:mm`
    pub expiry: String,
    pub id_tag: String,
    /// Assigned by the application's reservation storage
    pub reservation_id: i32,
}

/// Build the ReserveNow request for `version`
pub fn reserve_now_request(
    version: ProtocolVersion,
    connector_id: i32,
    params: &ReserveNowParams,
) -> Result<OcppRequest, DecodeError> {
    let id_tag = params.id_tag.trim();
    if id_tag.is_empty() {
        return Err(DecodeError::MissingField { field: "idTag".into() });
    }

    let expiry = NaiveDateTime::parse_from_str(params.expiry.trim(), EXPIRY_FORMAT).map_err(|e| {
        DecodeError::TypeMismatch {
            detail: format!("expiry {:?}: {}", params.expiry, e),
        }
    })?;
    let expiry_date = Utc.from_utc_datetime(&expiry);

    let request = match version {
        ProtocolVersion::V16 => v16::ReserveNowRequest {
            connector_id,
            expiry_date,
            id_tag: id_tag.to_string(),
            parent_id_tag: None,
            reservation_id: params.reservation_id,
        }
        .into(),
        ProtocolVersion::V15 => v15::ReserveNowRequest {
            connector_id,
            expiry_date,
            id_tag: id_tag.to_string(),
            parent_id_tag: None,
            reservation_id: params.reservation_id,
        }
        .into(),
    };
    Ok(request)
}

/// Reserve a connector of a known device
///
/// Fails before sending when the device is unknown or the parameters do not
/// parse; otherwise returns the handle of the sent call.
pub async fn reserve_connector(
    dispatcher: &Dispatcher,
    device_id: &str,
    connector_id: i32,
    params: ReserveNowParams,
) -> Result<CallHandle, DispatchError> {
    let selector = dispatcher.lookup_device_selector(device_id)?;
    let request = reserve_now_request(selector.protocol_version, connector_id, &params)?;

    info!(
        "Reserving connector {} of {} for {} until {}",
        connector_id, device_id, params.id_tag, params.expiry
    );
    let mut handles = dispatcher.dispatch(request, std::slice::from_ref(&selector)).await;
    handles
        .pop()
        .ok_or_else(|| DispatchError::Transport(format!("nothing dispatched to {}", device_id)))
}
