//! Inbound action handlers
//!
//! Handlers are registered per `(version, action)`. Typed closures receive
//! the request struct of their action and return its response struct; the
//! conversions to and from the version enums are handled here.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::error::HandlerError;
use crate::ocpp::{v15, v16, CallId, DataTransferStatus, OcppCall, OcppRequest, OcppResponse, ProtocolVersion};
use crate::transport::{SessionId, TransportKind};

/// Where an inbound CALL came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundContext {
    pub device_id: String,
    pub version: ProtocolVersion,
    pub transport: TransportKind,
    pub session: SessionId,
    pub call_id: CallId,
}

/// Handles one inbound action
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, ctx: &InboundContext, request: OcppRequest) -> Result<OcppResponse, HandlerError>;
}

struct TypedHandler<R, F> {
    f: F,
    _request: PhantomData<fn(R)>,
}

#[async_trait]
impl<R, F, Fut> ActionHandler for TypedHandler<R, F>
where
    R: OcppCall,
    F: Fn(InboundContext, R) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: &InboundContext, request: OcppRequest) -> Result<OcppResponse, HandlerError> {
        let typed = R::try_from(request).map_err(|other| {
            HandlerError::Internal(format!("{} handler received {}", R::ACTION, other.shape()))
        })?;
        let response = (self.f)(ctx.clone(), typed).await?;
        Ok(response.into())
    }
}

/// Handler table keyed by `(version, action)`
#[derive(Clone, Default)]
pub struct Handlers {
    table: HashMap<(ProtocolVersion, &'static str), Arc<dyn ActionHandler>>,
}

impl Handlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler working on the version enums
    pub fn register(
        mut self,
        version: ProtocolVersion,
        action: &'static str,
        handler: Arc<dyn ActionHandler>,
    ) -> Self {
        self.table.insert((version, action), handler);
        self
    }

    /// Register a typed handler for the action and version of `R`
    pub fn on<R, F, Fut>(self, f: F) -> Self
    where
        R: OcppCall,
        F: Fn(InboundContext, R) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R::Response, HandlerError>> + Send + 'static,
    {
        let handler = TypedHandler {
            f,
            _request: PhantomData,
        };
        self.register(R::VERSION, R::ACTION, Arc::new(handler))
    }

    pub fn get(&self, version: ProtocolVersion, action: &str) -> Option<Arc<dyn ActionHandler>> {
        self.table.get(&(version, action)).cloned()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl std::fmt::Debug for Handlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.table.keys().collect();
        keys.sort();
        f.debug_struct("Handlers").field("actions", &keys).finish()
    }
}

/// Handlers every central system needs, for both protocol versions
///
/// Heartbeat, BootNotification, StatusNotification, MeterValues,
/// DiagnosticsStatusNotification, FirmwareStatusNotification and
/// DataTransfer. Authorization and transactions are left to the embedding
/// application.
pub fn standard_handlers(config: &DispatchConfig) -> Handlers {
    let interval = config.heartbeat_interval;

    Handlers::new()
        .on(heartbeat_v16)
        .on(move |ctx, req: v16::BootNotificationRequest| boot_notification_v16(ctx, req, interval))
        .on(status_notification_v16)
        .on(meter_values_v16)
        .on(diagnostics_status_v16)
        .on(firmware_status_v16)
        .on(data_transfer_v16)
        .on(heartbeat_v15)
        .on(move |ctx, req: v15::BootNotificationRequest| boot_notification_v15(ctx, req, interval))
        .on(status_notification_v15)
        .on(meter_values_v15)
        .on(diagnostics_status_v15)
        .on(firmware_status_v15)
        .on(data_transfer_v15)
}

// ============================================================================
// OCPP 1.6
// ============================================================================

async fn heartbeat_v16(
    ctx: InboundContext,
    _req: v16::HeartbeatRequest,
) -> Result<v16::HeartbeatResponse, HandlerError> {
    debug!("Heartbeat from {}", ctx.device_id);
    Ok(v16::HeartbeatResponse { current_time: Utc::now() })
}

async fn boot_notification_v16(
    ctx: InboundContext,
    req: v16::BootNotificationRequest,
    interval: i32,
) -> Result<v16::BootNotificationResponse, HandlerError> {
    info!(
        "Boot notification from {}: {} {}",
        ctx.device_id, req.charge_point_vendor, req.charge_point_model
    );
    Ok(v16::BootNotificationResponse {
        status: v16::RegistrationStatus::Accepted,
        current_time: Utc::now(),
        interval,
    })
}

async fn status_notification_v16(
    ctx: InboundContext,
    req: v16::StatusNotificationRequest,
) -> Result<v16::StatusNotificationResponse, HandlerError> {
    info!(
        "Connector {} of {} is {:?} ({:?})",
        req.connector_id, ctx.device_id, req.status, req.error_code
    );
    Ok(v16::StatusNotificationResponse {})
}

async fn meter_values_v16(
    ctx: InboundContext,
    req: v16::MeterValuesRequest,
) -> Result<v16::MeterValuesResponse, HandlerError> {
    debug!(
        "{} meter values from {} connector {}",
        req.meter_value.len(),
        ctx.device_id,
        req.connector_id
    );
    Ok(v16::MeterValuesResponse {})
}

async fn diagnostics_status_v16(
    ctx: InboundContext,
    req: v16::DiagnosticsStatusNotificationRequest,
) -> Result<v16::DiagnosticsStatusNotificationResponse, HandlerError> {
    info!("Diagnostics status of {}: {:?}", ctx.device_id, req.status);
    Ok(v16::DiagnosticsStatusNotificationResponse {})
}

async fn firmware_status_v16(
    ctx: InboundContext,
    req: v16::FirmwareStatusNotificationRequest,
) -> Result<v16::FirmwareStatusNotificationResponse, HandlerError> {
    info!("Firmware status of {}: {:?}", ctx.device_id, req.status);
    Ok(v16::FirmwareStatusNotificationResponse {})
}

async fn data_transfer_v16(
    ctx: InboundContext,
    req: v16::DataTransferRequest,
) -> Result<v16::DataTransferResponse, HandlerError> {
    debug!("Data transfer from {} for vendor {}", ctx.device_id, req.vendor_id);
    Ok(v16::DataTransferResponse {
        status: DataTransferStatus::UnknownVendorId,
        data: None,
    })
}

// ============================================================================
// OCPP 1.5
// ============================================================================

async fn heartbeat_v15(
    ctx: InboundContext,
    _req: v15::HeartbeatRequest,
) -> Result<v15::HeartbeatResponse, HandlerError> {
    debug!("Heartbeat from {}", ctx.device_id);
    Ok(v15::HeartbeatResponse { current_time: Utc::now() })
}

async fn boot_notification_v15(
    ctx: InboundContext,
    req: v15::BootNotificationRequest,
    interval: i32,
) -> Result<v15::BootNotificationResponse, HandlerError> {
    info!(
        "Boot notification from {}: {} {}",
        ctx.device_id, req.charge_point_vendor, req.charge_point_model
    );
    Ok(v15::BootNotificationResponse {
        status: v15::RegistrationStatus::Accepted,
        current_time: Utc::now(),
        heartbeat_interval: interval,
    })
}

async fn status_notification_v15(
    ctx: InboundContext,
    req: v15::StatusNotificationRequest,
) -> Result<v15::StatusNotificationResponse, HandlerError> {
    info!(
        "Connector {} of {} is {:?} ({:?})",
        req.connector_id, ctx.device_id, req.status, req.error_code
    );
    Ok(v15::StatusNotificationResponse {})
}

async fn meter_values_v15(
    ctx: InboundContext,
    req: v15::MeterValuesRequest,
) -> Result<v15::MeterValuesResponse, HandlerError> {
    debug!(
        "{} meter values from {} connector {}",
        req.values.len(),
        ctx.device_id,
        req.connector_id
    );
    Ok(v15::MeterValuesResponse {})
}

async fn diagnostics_status_v15(
    ctx: InboundContext,
    req: v15::DiagnosticsStatusNotificationRequest,
) -> Result<v15::DiagnosticsStatusNotificationResponse, HandlerError> {
    info!("Diagnostics status of {}: {:?}", ctx.device_id, req.status);
    Ok(v15::DiagnosticsStatusNotificationResponse {})
}

async fn firmware_status_v15(
    ctx: InboundContext,
    req: v15::FirmwareStatusNotificationRequest,
) -> Result<v15::FirmwareStatusNotificationResponse, HandlerError> {
    info!("Firmware status of {}: {:?}", ctx.device_id, req.status);
    Ok(v15::FirmwareStatusNotificationResponse {})
}

async fn data_transfer_v15(
    ctx: InboundContext,
    req: v15::DataTransferRequest,
) -> Result<v15::DataTransferResponse, HandlerError> {
    debug!("Data transfer from {} for vendor {}", ctx.device_id, req.vendor_id);
    Ok(v15::DataTransferResponse {
        status: DataTransferStatus::UnknownVendorId,
        data: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(version: ProtocolVersion) -> InboundContext {
        InboundContext {
            device_id: "CP-1".into(),
            version,
            transport: TransportKind::WebSocket,
            session: SessionId::next(),
            call_id: "in-1".into(),
        }
    }

    #[test]
    fn test_standard_handlers_cover_both_versions() {
        let handlers = standard_handlers(&DispatchConfig::default());
        assert_eq!(handlers.len(), 14);
        for version in ProtocolVersion::ALL {
            for action in ["Heartbeat", "BootNotification", "DataTransfer", "MeterValues"] {
                assert!(handlers.get(version, action).is_some(), "{} {}", version, action);
            }
            assert!(handlers.get(version, "Authorize").is_none());
        }
    }

    #[tokio::test]
    async fn test_boot_notification_uses_configured_interval() {
        let config = DispatchConfig::default().with_heartbeat_interval(42);
        let handlers = standard_handlers(&config);
        let handler = handlers.get(ProtocolVersion::V16, "BootNotification").unwrap();

        let request: OcppRequest = v16::BootNotificationRequest {
            charge_point_vendor: "EK".into(),
            charge_point_model: "EK3".into(),
            charge_point_serial_number: None,
            charge_box_serial_number: None,
            firmware_version: None,
            iccid: None,
            imsi: None,
            meter_type: None,
            meter_serial_number: None,
        }
        .into();

        let response = handler.handle(&ctx(ProtocolVersion::V16), request).await.unwrap();
        let boot = v16::BootNotificationResponse::try_from(response).unwrap();
        assert_eq!(boot.status, v16::RegistrationStatus::Accepted);
        assert_eq!(boot.interval, 42);
    }

    #[tokio::test]
    async fn test_typed_handler_rejects_foreign_request() {
        let handlers = Handlers::new().on(heartbeat_v15);
        let handler = handlers.get(ProtocolVersion::V15, "Heartbeat").unwrap();

        let wrong: OcppRequest = v16::HeartbeatRequest {}.into();
        let err = handler.handle(&ctx(ProtocolVersion::V15), wrong).await.unwrap_err();
        assert!(matches!(err, HandlerError::Internal(_)));
    }
}
