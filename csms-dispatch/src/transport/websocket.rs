//! OCPP-J WebSocket transport
//!
//! Charge points connect to `ws://host:port/<anything>/<device id>` and offer
//! one or more `ocpp1.x` subprotocols. The first version in the configured
//! preference list that the device offered is selected; the connection is
//! bound to it until it closes.
//!
//! Each connection gets a reader loop (frames are processed in arrival
//! order) and a writer task fed through an mpsc channel, so that outbound
//! calls and replies to inbound calls share one ordered sink.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    accept_hdr_async_with_config,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::{header, HeaderValue, StatusCode},
        protocol::WebSocketConfig as FrameLimits,
        Message,
    },
    WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::{formation_violation, Connection, DeviceSelector, FrameOrigin, FrameSink, SessionId, TransportAdapter, TransportKind};
use crate::codec::{EnvelopeCodec, JsonRpcCodec, Route};
use crate::config::WebSocketConfig;
use crate::error::DispatchError;
use crate::ocpp::{ProtocolVersion, WireMessage};

struct ConnectionEntry {
    connection: Connection,
    /// `None` once the connection is gone
    outgoing: Option<mpsc::Sender<Message>>,
    /// Stops the reader when the connection is replaced
    shutdown: Arc<Notify>,
}

struct Inner {
    config: WebSocketConfig,
    connections: RwLock<HashMap<String, ConnectionEntry>>,
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

/// Server side of OCPP-J
#[derive(Clone)]
pub struct WebSocketAdapter {
    inner: Arc<Inner>,
}

impl WebSocketAdapter {
    pub fn new(config: WebSocketConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                connections: RwLock::new(HashMap::new()),
                sink: RwLock::new(None),
            }),
        }
    }

    /// Bind the configured address and accept connections forever
    pub async fn listen(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.inner.config.bind_addr).await?;
        info!("OCPP-J listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accept connections from an already bound listener
    pub async fn serve(&self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("TCP connection from {}", peer);
            let adapter = self.clone();
            tokio::spawn(async move {
                if let Err(e) = adapter.accept(stream).await {
                    warn!("Handshake with {} failed: {}", peer, e);
                }
            });
        }
    }

    /// Run the server handshake on a raw stream and attach the connection
    pub async fn accept<S>(&self, stream: S) -> Result<JoinHandle<()>, DispatchError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let preference = self.inner.config.subprotocols.clone();
        let mut negotiated = None;

        let callback = |request: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
            let offered = request
                .headers()
                .get(header::SEC_WEBSOCKET_PROTOCOL)
                .and_then(|v| v.to_str().ok());
            match negotiate(request.uri().path(), offered, &preference) {
                Ok((device_id, version)) => {
                    response.headers_mut().insert(
                        header::SEC_WEBSOCKET_PROTOCOL,
                        HeaderValue::from_static(version.subprotocol()),
                    );
                    negotiated = Some((device_id, version));
                    Ok(response)
                }
                Err(reason) => {
                    warn!("Rejecting handshake for {}: {}", request.uri(), reason);
                    let mut rejection = ErrorResponse::new(Some(reason));
                    *rejection.status_mut() = StatusCode::BAD_REQUEST;
                    Err(rejection)
                }
            }
        };

        let limits = FrameLimits {
            max_message_size: Some(self.inner.config.max_message_size),
            max_frame_size: Some(self.inner.config.max_frame_size),
            ..Default::default()
        };

        let ws = accept_hdr_async_with_config(stream, callback, Some(limits))
            .await
            .map_err(DispatchError::transport)?;
        let (device_id, version) = negotiated
            .ok_or_else(|| DispatchError::Transport("handshake finished without a subprotocol".into()))?;

        Ok(self.attach(ws, device_id, version))
    }

    /// Take over an established WebSocket for `device_id`
    ///
    /// Replaces any earlier connection of the same device; calls pending on
    /// the replaced session fail.
    pub fn attach<S>(&self, ws: WebSocketStream<S>, device_id: String, version: ProtocolVersion) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session = SessionId::next();
        let (out_tx, out_rx) = mpsc::channel::<Message>(64);
        let shutdown = Arc::new(Notify::new());

        let replaced = {
            let mut connections = self.inner.connections.write();
            let entry = ConnectionEntry {
                connection: Connection::new(device_id.clone(), version, session),
                outgoing: Some(out_tx.clone()),
                shutdown: shutdown.clone(),
            };
            connections.insert(device_id.clone(), entry).and_then(|previous| {
                let old = previous.outgoing?;
                if let Err(e) = old.try_send(Message::Close(None)) {
                    warn!("Could not queue close for replaced {}: {}", previous.connection.session, e);
                }
                previous.shutdown.notify_one();
                Some(previous.connection.session)
            })
        };

        info!("{} connected with {} ({})", device_id, version.subprotocol(), session);
        if let Some(old) = replaced {
            info!("{} reconnected, dropping {}", device_id, old);
        }

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Some(old) = replaced {
                if let Some(sink) = inner.sink() {
                    sink.on_disconnect(old, &device_id).await;
                }
            }
            let origin = FrameOrigin {
                session,
                device_id,
                version,
                transport: TransportKind::WebSocket,
            };
            inner.run(ws, origin, out_tx, out_rx, shutdown).await;
        })
    }

    /// Snapshot of a device's connection; `pending` is left empty
    pub fn connection(&self, device_id: &str) -> Option<Connection> {
        self.inner
            .connections
            .read()
            .get(device_id)
            .map(|entry| entry.connection.clone())
    }

    /// Devices with a live connection, sorted
    pub fn connected_devices(&self) -> Vec<String> {
        let mut devices: Vec<_> = self
            .inner
            .connections
            .read()
            .values()
            .filter(|entry| entry.connection.is_connected())
            .map(|entry| entry.connection.device_id.clone())
            .collect();
        devices.sort();
        devices
    }
}

impl Inner {
    fn sink(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink.read().clone()
    }

    async fn run<S>(
        &self,
        ws: WebSocketStream<S>,
        origin: FrameOrigin,
        out_tx: mpsc::Sender<Message>,
        mut out_rx: mpsc::Receiver<Message>,
        shutdown: Arc<Notify>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut ws_tx, mut ws_rx) = ws.split();

        let writer = tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_tx.send(msg).await {
                    error!("Failed to send WebSocket message: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let route = Route::new(origin.device_id.clone(), origin.version);
        loop {
            let frame = tokio::select! {
                biased;
                _ = shutdown.notified() => {
                    info!("{} replaced, closing {}", origin.device_id, origin.session);
                    break;
                }
                frame = ws_rx.next() => frame,
            };
            let Some(frame) = frame else {
                break;
            };
            match frame {
                Ok(Message::Text(text)) => {
                    debug!("Received from {}: {}", origin.device_id, text);
                    let Some(reply) = self.process(&origin, text.as_bytes()).await else {
                        continue;
                    };
                    match text_frame(&reply, &route) {
                        Ok(msg) => {
                            if out_tx.send(msg).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => error!("Failed to encode reply to {}: {}", origin.device_id, e),
                    }
                }
                Ok(Message::Binary(_)) => {
                    warn!("Ignoring binary frame from {}", origin.device_id);
                }
                Ok(Message::Close(_)) => {
                    info!("{} closed the connection", origin.device_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("WebSocket error on {}: {}", origin.device_id, e);
                    break;
                }
            }
        }

        {
            let mut connections = self.connections.write();
            if let Some(entry) = connections.get_mut(&origin.device_id) {
                if entry.connection.session == origin.session {
                    entry.connection.mark_disconnected();
                    entry.outgoing = None;
                }
            }
        }
        writer.abort();
        info!("{} disconnected ({})", origin.device_id, origin.session);

        if let Some(sink) = self.sink() {
            sink.on_disconnect(origin.session, &origin.device_id).await;
        }
    }

    async fn process(&self, origin: &FrameOrigin, bytes: &[u8]) -> Option<WireMessage> {
        match JsonRpcCodec.decode(bytes) {
            Ok(decoded) => match self.sink() {
                Some(sink) => sink.on_frame(origin, decoded.message).await,
                None => {
                    warn!("No receiver registered, dropping frame from {}", origin.device_id);
                    None
                }
            },
            Err(e) => {
                warn!("Undecodable frame from {}: {}", origin.device_id, e);
                formation_violation(&e)
            }
        }
    }
}

fn text_frame(message: &WireMessage, route: &Route) -> Result<Message, DispatchError> {
    let bytes = JsonRpcCodec.encode(message, route)?;
    let text = String::from_utf8(bytes).map_err(DispatchError::transport)?;
    Ok(Message::Text(text))
}

/// Device id from the request path and the subprotocol to use
///
/// `preference` is in the server's order of preference; the first entry the
/// client offered wins.
fn negotiate(
    path: &str,
    offered: Option<&str>,
    preference: &[ProtocolVersion],
) -> Result<(String, ProtocolVersion), String> {
    let device_id = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
        .ok_or_else(|| "no charge point identity in path".to_string())?;

    let offered: Vec<&str> = offered
        .map(|header| header.split(',').map(str::trim).collect())
        .unwrap_or_default();
    if offered.is_empty() {
        return Err("no OCPP subprotocol offered".into());
    }

    preference
        .iter()
        .copied()
        .find(|version| offered.contains(&version.subprotocol()))
        .map(|version| (device_id.to_string(), version))
        .ok_or_else(|| format!("unsupported subprotocols: {}", offered.join(", ")))
}

#[async_trait]
impl TransportAdapter for WebSocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn open_session(&self, selector: &DeviceSelector) -> Result<SessionId, DispatchError> {
        let connections = self.inner.connections.read();
        match connections.get(&selector.device_id) {
            Some(entry) if entry.connection.is_connected() => {
                let negotiated = entry.connection.protocol_version;
                if negotiated != selector.protocol_version {
                    return Err(DispatchError::Transport(format!(
                        "{} negotiated OCPP {}, not {}",
                        selector.device_id, negotiated, selector.protocol_version
                    )));
                }
                Ok(entry.connection.session)
            }
            _ => Err(DispatchError::Transport(format!("{} is not connected", selector.device_id))),
        }
    }

    async fn send(
        &self,
        selector: &DeviceSelector,
        session: SessionId,
        message: WireMessage,
    ) -> Result<(), DispatchError> {
        let outgoing = {
            let connections = self.inner.connections.read();
            connections
                .get(&selector.device_id)
                .filter(|entry| entry.connection.session == session)
                .and_then(|entry| entry.outgoing.clone())
        };
        let outgoing = outgoing.ok_or_else(|| {
            DispatchError::Transport(format!("session {} of {} is gone", session, selector.device_id))
        })?;

        let route = Route::new(selector.device_id.clone(), selector.protocol_version);
        let frame = text_frame(&message, &route)?;
        outgoing
            .send(frame)
            .await
            .map_err(|_| DispatchError::Transport(format!("connection to {} closed", selector.device_id)))
    }

    fn on_receive(&self, sink: Arc<dyn FrameSink>) {
        *self.inner.sink.write() = Some(sink);
    }

    fn connection(&self, device_id: &str) -> Option<Connection> {
        WebSocketAdapter::connection(self, device_id)
    }
}
