//! Synchronous document exchange
//!
//! Outbound: one HTTP round trip per call. The request document is posted to
//! the selector's endpoint and the response document comes back in the same
//! exchange, so every call gets its own session and nothing stays pending
//! once `send` returns.
//!
//! Inbound: the embedding HTTP server hands request documents to
//! [`DocumentAdapter::handle_inbound`] and writes back the returned bytes.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, warn};

use super::{DeviceSelector, FrameOrigin, FrameSink, SessionId, TransportAdapter, TransportKind, NO_ENDPOINT};
use crate::codec::{DocumentCodec, EnvelopeCodec, Route};
use crate::config::DocumentConfig;
use crate::error::{DecodeError, DispatchError};
use crate::ocpp::WireMessage;

/// One request/response round trip to a device endpoint
#[async_trait]
pub trait DocumentExchange: Send + Sync {
    async fn exchange(&self, endpoint: &str, document: Vec<u8>) -> Result<Vec<u8>, DispatchError>;
}

/// Document exchange over HTTP POST
#[derive(Debug, Clone)]
pub struct HttpExchange {
    client: reqwest::Client,
}

impl HttpExchange {
    pub fn new(config: &DocumentConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(DispatchError::transport)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl DocumentExchange for HttpExchange {
    async fn exchange(&self, endpoint: &str, document: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
        let response = self
            .client
            .post(endpoint)
            .header(CONTENT_TYPE, "application/json")
            .body(document)
            .send()
            .await
            .map_err(DispatchError::transport)?
            .error_for_status()
            .map_err(DispatchError::transport)?;
        let body = response.bytes().await.map_err(DispatchError::transport)?;
        Ok(body.to_vec())
    }
}

/// Document-exchange transport adapter
pub struct DocumentAdapter {
    exchange: Arc<dyn DocumentExchange>,
    codec: DocumentCodec,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

impl DocumentAdapter {
    pub fn new(exchange: Arc<dyn DocumentExchange>) -> Self {
        Self {
            exchange,
            codec: DocumentCodec::central_system(),
            sink: RwLock::new(None),
        }
    }

    /// Adapter posting documents with [`HttpExchange`]
    pub fn http(config: &DocumentConfig) -> Result<Self, DispatchError> {
        Ok(Self::new(Arc::new(HttpExchange::new(config)?)))
    }

    fn sink(&self) -> Result<Arc<dyn FrameSink>, DispatchError> {
        self.sink
            .read()
            .clone()
            .ok_or_else(|| DispatchError::Transport("no receiver registered".into()))
    }

    /// Answer a request document posted by a charge point
    ///
    /// Envelope errors are returned as `Err`; the HTTP layer answers those
    /// without a document.
    pub async fn handle_inbound(&self, bytes: &[u8]) -> Result<Vec<u8>, DispatchError> {
        let decoded = self.codec.decode_addressed(bytes).map_err(|e| {
            warn!("Undecodable request document: {}", e);
            DispatchError::Decode(e.error)
        })?;
        let route = decoded
            .route
            .ok_or_else(|| DecodeError::malformed("document without header"))?;
        let WireMessage::Call { call_id, action, payload } = decoded.message else {
            return Err(DecodeError::malformed("expected a request document").into());
        };

        let origin = FrameOrigin {
            session: SessionId::next(),
            device_id: route.device_id.clone(),
            version: route.version,
            transport: TransportKind::Document,
        };
        debug!("{} document from {} ({})", action, origin.device_id, origin.session);

        let reply = self
            .sink()?
            .on_frame(&origin, WireMessage::Call { call_id, action: action.clone(), payload })
            .await
            .ok_or_else(|| DispatchError::Transport(format!("{} was not answered", action)))?;

        self.codec.encode(&reply, &route.with_action(action))
    }
}

#[async_trait]
impl TransportAdapter for DocumentAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Document
    }

    async fn open_session(&self, selector: &DeviceSelector) -> Result<SessionId, DispatchError> {
        let endpoint = selector.identity_tag.trim();
        if endpoint.is_empty() || endpoint == NO_ENDPOINT {
            return Err(DispatchError::Transport(format!(
                "no document endpoint for {}",
                selector.device_id
            )));
        }
        Ok(SessionId::next())
    }

    async fn send(
        &self,
        selector: &DeviceSelector,
        session: SessionId,
        message: WireMessage,
    ) -> Result<(), DispatchError> {
        let route = Route::new(selector.device_id.clone(), selector.protocol_version);
        let request = self.codec.encode(&message, &route)?;

        debug!("Posting {} to {}", message.call_id(), selector.identity_tag);
        let reply = self.exchange.exchange(&selector.identity_tag, request).await?;

        let decoded = self.codec.decode_addressed(&reply).map_err(|e| {
            warn!("Undecodable response document from {}: {}", selector.device_id, e);
            DispatchError::Decode(e.error)
        })?;
        if decoded.message.is_call() {
            return Err(DispatchError::Transport(format!(
                "{} answered with a request document",
                selector.device_id
            )));
        }
        if let Some(route) = &decoded.route {
            if route.version != selector.protocol_version {
                warn!(
                    "{} answered in the OCPP {} namespace, expected {}",
                    selector.device_id, route.version, selector.protocol_version
                );
            }
        }

        let origin = FrameOrigin {
            session,
            device_id: selector.device_id.clone(),
            version: selector.protocol_version,
            transport: TransportKind::Document,
        };
        self.sink()?.on_frame(&origin, decoded.message).await;
        Ok(())
    }

    fn on_receive(&self, sink: Arc<dyn FrameSink>) {
        *self.sink.write() = Some(sink);
    }

    fn is_synchronous(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::correlator::Correlator;
    use crate::handlers::standard_handlers;
    use crate::ocpp::{ErrorCode, ProtocolVersion};
    use crate::registry::SchemaRegistry;
    use crate::router::InboundRouter;
    use serde_json::{json, Value};
    use std::time::Duration;

    struct Unreachable;

    #[async_trait]
    impl DocumentExchange for Unreachable {
        async fn exchange(&self, endpoint: &str, _document: Vec<u8>) -> Result<Vec<u8>, DispatchError> {
            Err(DispatchError::Transport(format!("{} unreachable", endpoint)))
        }
    }

    fn adapter() -> DocumentAdapter {
        let adapter = DocumentAdapter::new(Arc::new(Unreachable));
        let router = InboundRouter::new(
            Arc::new(SchemaRegistry::new()),
            Arc::new(Correlator::new(Duration::from_secs(60))),
            standard_handlers(&DispatchConfig::default()),
        );
        adapter.on_receive(Arc::new(router));
        adapter
    }

    fn request_document(namespace: &str, action: &str, body: Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "header": {
                "namespace": namespace,
                "chargeBoxIdentity": "CP-7",
                "action": action,
                "messageId": "in-1"
            },
            "body": body
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_session_needs_endpoint() {
        let adapter = adapter();
        let missing = DeviceSelector::document("CP-7", ProtocolVersion::V15, NO_ENDPOINT);
        assert!(adapter.open_session(&missing).await.is_err());

        let ok = DeviceSelector::document("CP-7", ProtocolVersion::V15, "http://cp-7.local/ocpp");
        assert!(adapter.open_session(&ok).await.is_ok());
    }

    #[tokio::test]
    async fn test_inbound_heartbeat_answered_in_own_namespace() {
        let adapter = adapter();
        let bytes = adapter
            .handle_inbound(&request_document("urn://Ocpp/Cs/2012/06/", "Heartbeat", json!({})))
            .await
            .unwrap();

        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["header"]["namespace"], "urn://Ocpp/Cs/2012/06/");
        assert_eq!(doc["header"]["relatesTo"], "in-1");
        assert_eq!(doc["header"]["action"], "Heartbeat");
        assert!(doc["body"]["currentTime"].is_string());
    }

    #[tokio::test]
    async fn test_inbound_unsupported_action_is_a_fault() {
        let adapter = adapter();
        let bytes = adapter
            .handle_inbound(&request_document("urn://Ocpp/Cs/2012/06/", "TriggerMessage", json!({})))
            .await
            .unwrap();

        let doc: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(doc["fault"]["code"], ErrorCode::NotSupported.as_str());
    }

    #[tokio::test]
    async fn test_inbound_request_for_charge_point_service_is_rejected() {
        let adapter = adapter();
        let err = adapter
            .handle_inbound(&request_document("urn://Ocpp/Cp/2012/06/", "Heartbeat", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Decode(DecodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_inbound_garbage_is_an_error() {
        let adapter = adapter();
        let err = adapter.handle_inbound(b"not a document").await.unwrap_err();
        assert!(matches!(err, DispatchError::Decode(DecodeError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_send_surfaces_exchange_failure() {
        let adapter = adapter();
        let selector = DeviceSelector::document("CP-7", ProtocolVersion::V16, "http://cp-7.local/ocpp");
        let session = adapter.open_session(&selector).await.unwrap();
        let err = adapter
            .send(&selector, session, WireMessage::call("m-1", "ClearCache", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
    }
}
