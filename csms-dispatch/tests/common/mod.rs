//! Shared fixtures: dispatcher setup and in-memory charge points
#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest,
    http::{header, HeaderValue},
    Message,
};
use tokio_tungstenite::{client_async, WebSocketStream};

use csms_dispatch::config::DispatchConfig;
use csms_dispatch::{standard_handlers, Dispatcher, InMemoryRepository, WebSocketAdapter};

/// Charge point end of an in-memory connection
pub type Device = WebSocketStream<DuplexStream>;

pub struct Csms {
    pub dispatcher: Dispatcher,
    pub websocket: WebSocketAdapter,
    pub repository: Arc<InMemoryRepository>,
}

/// Dispatcher with the standard handlers and sequential call ids
pub fn csms(config: DispatchConfig) -> Csms {
    let counter = AtomicU64::new(1);
    csms_with_ids(config, move || format!("c-{}", counter.fetch_add(1, Ordering::Relaxed)))
}

pub fn csms_with_ids(config: DispatchConfig, ids: impl Fn() -> String + Send + Sync + 'static) -> Csms {
    let websocket = WebSocketAdapter::new(config.websocket.clone());
    let repository = Arc::new(InMemoryRepository::new());
    let dispatcher = Dispatcher::builder()
        .handlers(standard_handlers(&config))
        .adapter(Arc::new(websocket.clone()))
        .repository(repository.clone())
        .call_ids(ids)
        .config(config)
        .build();
    Csms {
        dispatcher,
        websocket,
        repository,
    }
}

/// Run the handshake for `device_id` offering `protocols`
pub async fn try_connect(
    websocket: &WebSocketAdapter,
    device_id: &str,
    protocols: &str,
) -> Result<Device, tokio_tungstenite::tungstenite::Error> {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = {
        let websocket = websocket.clone();
        tokio::spawn(async move { websocket.accept(server_io).await })
    };

    let mut request = format!("ws://csms.test/ocpp/{}", device_id)
        .into_client_request()
        .unwrap();
    request
        .headers_mut()
        .insert(header::SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_str(protocols).unwrap());

    let result = client_async(request, client_io).await.map(|(ws, _)| ws);
    if result.is_ok() {
        // The connection is registered once the server side returns
        server.await.unwrap().unwrap();
    }
    result
}

pub async fn connect(websocket: &WebSocketAdapter, device_id: &str, protocols: &str) -> Device {
    try_connect(websocket, device_id, protocols).await.unwrap()
}

/// Next text frame as JSON
pub async fn recv(device: &mut Device) -> Value {
    loop {
        match device.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("connection ended: {:?}", other),
        }
    }
}

pub async fn send(device: &mut Device, frame: Value) {
    device.send(Message::Text(frame.to_string())).await.unwrap();
}

pub async fn send_raw(device: &mut Device, text: &str) {
    device.send(Message::Text(text.to_string())).await.unwrap();
}

/// Read the next CALL, check its action and return its id
pub async fn expect_call(device: &mut Device, action: &str) -> (String, Value) {
    let frame = recv(device).await;
    assert_eq!(frame[0], 2, "expected CALL, got {}", frame);
    assert_eq!(frame[2], action);
    (frame[1].as_str().unwrap().to_string(), frame[3].clone())
}
