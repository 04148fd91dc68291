//! Inbound routing
//!
//! Every decoded envelope from every adapter ends up here. CALLs are
//! resolved against the sender's negotiated version, decoded, handled and
//! answered; CALLRESULTs and CALLERRORs go to the correlator.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::correlator::Correlator;
use crate::error::DispatchError;
use crate::handlers::{Handlers, InboundContext};
use crate::ocpp::{ErrorCode, WireMessage};
use crate::registry::SchemaRegistry;
use crate::transport::{FrameOrigin, FrameSink, SessionId};

/// Frame sink shared by all transport adapters
pub struct InboundRouter {
    registry: Arc<SchemaRegistry>,
    correlator: Arc<Correlator>,
    handlers: Handlers,
}

impl InboundRouter {
    pub fn new(registry: Arc<SchemaRegistry>, correlator: Arc<Correlator>, handlers: Handlers) -> Self {
        Self {
            registry,
            correlator,
            handlers,
        }
    }

    /// Answer one inbound CALL; always produces a CALLRESULT or CALLERROR
    pub async fn handle_call(
        &self,
        origin: &FrameOrigin,
        call_id: String,
        action: String,
        payload: serde_json::Value,
    ) -> WireMessage {
        let shape = match self.registry.resolve_request_shape(&action, origin.version) {
            Ok(shape) => shape,
            Err(e) => {
                warn!("{} sent unsupported action {} (OCPP {})", origin.device_id, action, origin.version);
                return WireMessage::error(call_id, e.error_code(), e.to_string());
            }
        };

        let request = match shape.decode(payload) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid {} from {}: {}", shape.name, origin.device_id, e);
                return WireMessage::error(call_id, e.error_code(), e.to_string());
            }
        };

        let handler = match self.handlers.get(origin.version, &action) {
            Some(handler) => handler,
            None => {
                info!("No handler for {} (OCPP {}) from {}", action, origin.version, origin.device_id);
                return WireMessage::error(
                    call_id,
                    ErrorCode::NotImplemented,
                    format!("{} is not implemented", action),
                );
            }
        };

        let ctx = InboundContext {
            device_id: origin.device_id.clone(),
            version: origin.version,
            transport: origin.transport,
            session: origin.session,
            call_id: call_id.clone(),
        };

        match handler.handle(&ctx, request).await {
            Ok(response) => {
                let expected = self
                    .registry
                    .descriptor(&action, origin.version)
                    .map(|d| d.response.name);
                if expected != Some(response.shape()) {
                    warn!("Handler for {} returned {}", action, response.shape());
                    return WireMessage::error(
                        call_id,
                        ErrorCode::InternalError,
                        "handler returned the wrong response shape",
                    );
                }
                match response.to_payload() {
                    Ok(payload) => {
                        debug!("Answered {} {} from {}", action, call_id, origin.device_id);
                        WireMessage::result(call_id, payload)
                    }
                    Err(e) => WireMessage::error(call_id, ErrorCode::InternalError, e.to_string()),
                }
            }
            Err(e) => {
                info!("Handler for {} from {} refused: {}", action, origin.device_id, e);
                WireMessage::error(call_id, e.error_code(), e.description())
            }
        }
    }
}

#[async_trait]
impl FrameSink for InboundRouter {
    async fn on_frame(&self, origin: &FrameOrigin, message: WireMessage) -> Option<WireMessage> {
        match message {
            WireMessage::Call {
                call_id,
                action,
                payload,
            } => Some(self.handle_call(origin, call_id, action, payload).await),
            answer => {
                self.correlator.resolve(origin.session, answer);
                None
            }
        }
    }

    async fn on_disconnect(&self, session: SessionId, device_id: &str) {
        let error = DispatchError::Transport(format!("connection to {} lost", device_id));
        self.correlator.fail_session(session, error);
    }
}

impl std::fmt::Debug for InboundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRouter")
            .field("handlers", &self.handlers)
            .finish()
    }
}
