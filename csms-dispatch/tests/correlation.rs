//! Correlation under concurrency: out-of-order answers, duplicates, races

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;

use csms_dispatch::config::DispatchConfig;
use csms_dispatch::correlator::{Correlator, Resolution};
use csms_dispatch::ocpp::{v16, ProtocolVersion, WireMessage};
use csms_dispatch::transport::{FrameOrigin, FrameSink, SessionId};
use csms_dispatch::{DeviceSelector, DispatchError, Dispatcher, TransportAdapter, TransportKind};

/// Records outbound CALLs instead of sending them anywhere
#[derive(Default)]
struct Loopback {
    sent: Mutex<Vec<(DeviceSelector, SessionId, WireMessage)>>,
}

#[async_trait]
impl TransportAdapter for Loopback {
    fn kind(&self) -> TransportKind {
        TransportKind::WebSocket
    }

    async fn open_session(&self, _selector: &DeviceSelector) -> Result<SessionId, DispatchError> {
        Ok(SessionId::next())
    }

    async fn send(
        &self,
        selector: &DeviceSelector,
        session: SessionId,
        message: WireMessage,
    ) -> Result<(), DispatchError> {
        self.sent.lock().push((selector.clone(), session, message));
        Ok(())
    }

    fn on_receive(&self, _sink: Arc<dyn FrameSink>) {}
}

fn loopback_dispatcher() -> (Dispatcher, Arc<Loopback>) {
    loopback_dispatcher_with(DispatchConfig::default())
}

fn loopback_dispatcher_with(config: DispatchConfig) -> (Dispatcher, Arc<Loopback>) {
    let loopback = Arc::new(Loopback::default());
    let dispatcher = Dispatcher::builder()
        .config(config)
        .adapter(loopback.clone())
        .build();
    (dispatcher, loopback)
}

fn origin(selector: &DeviceSelector, session: SessionId) -> FrameOrigin {
    FrameOrigin {
        session,
        device_id: selector.device_id.clone(),
        version: selector.protocol_version,
        transport: TransportKind::WebSocket,
    }
}

/// Completion order: indices sorted by random keys
fn order(keys: &[u32]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..keys.len()).collect();
    order.sort_by_key(|&i| (keys[i], i));
    order
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_each_caller_gets_its_own_response(keys in proptest::collection::vec(any::<u32>(), 1..16)) {
        tokio_test::block_on(async {
            let (dispatcher, loopback) = loopback_dispatcher();
            let selectors: Vec<_> = (0..keys.len())
                .map(|i| DeviceSelector::websocket(format!("CP-{}", i), ProtocolVersion::V16))
                .collect();

            let handles = dispatcher.call(v16::GetLocalListVersionRequest {}, &selectors).await;
            let sent = loopback.sent.lock().clone();
            assert_eq!(sent.len(), selectors.len());

            for i in order(&keys) {
                let (selector, session, call) = &sent[i];
                let device_index: i32 = selector.device_id[3..].parse().unwrap();
                let answer = WireMessage::result(call.call_id(), json!({"listVersion": device_index}));
                dispatcher.inbound().on_frame(&origin(selector, *session), answer).await;
            }

            for (i, handle) in handles.into_iter().enumerate() {
                assert_eq!(handle.selector(), &selectors[i]);
                let response = handle.wait().await.unwrap();
                assert_eq!(response.list_version, i as i32);
            }
            assert_eq!(dispatcher.stats().resolved, keys.len() as u64);
            assert_eq!(dispatcher.correlator().pending_count(), 0);
        });
    }
}

#[tokio::test]
async fn test_duplicate_response_counted_and_ignored() {
    let (dispatcher, loopback) = loopback_dispatcher();
    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let handle = dispatcher
        .call(v16::GetLocalListVersionRequest {}, std::slice::from_ref(&selector))
        .await
        .pop()
        .unwrap();

    let (_, session, call) = loopback.sent.lock()[0].clone();
    let from = origin(&selector, session);
    dispatcher
        .inbound()
        .on_frame(&from, WireMessage::result(call.call_id(), json!({"listVersion": 1})))
        .await;
    dispatcher
        .inbound()
        .on_frame(&from, WireMessage::result(call.call_id(), json!({"listVersion": 2})))
        .await;

    assert_eq!(handle.wait().await.unwrap().list_version, 1);
    let stats = dispatcher.stats();
    assert_eq!(stats.resolved, 1);
    assert_eq!(stats.duplicate, 1);
}

#[tokio::test]
async fn test_cancel_racing_late_response_delivers_once() {
    let (dispatcher, loopback) = loopback_dispatcher();
    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let handle = dispatcher
        .call(v16::GetLocalListVersionRequest {}, std::slice::from_ref(&selector))
        .await
        .pop()
        .unwrap();
    let canceller = handle.canceller().unwrap();
    let (_, session, call) = loopback.sent.lock()[0].clone();

    let inbound = dispatcher.inbound().clone();
    let from = origin(&selector, session);
    let answer = WireMessage::result(call.call_id(), json!({"listVersion": 1}));
    let (cancelled, _) = tokio::join!(async { canceller.cancel() }, inbound.on_frame(&from, answer));

    let outcome = handle.wait().await;
    let stats = dispatcher.stats();
    if cancelled {
        assert_eq!(outcome.unwrap_err(), DispatchError::Cancelled);
        assert_eq!(stats.late, 1);
        assert_eq!(stats.resolved, 0);
    } else {
        assert_eq!(outcome.unwrap().list_version, 1);
        assert_eq!(stats.resolved, 1);
    }
    assert_eq!(stats.failed + stats.resolved, 1);
}

#[tokio::test]
async fn test_undecodable_response_fails_the_call() {
    let (dispatcher, loopback) = loopback_dispatcher();
    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let handle = dispatcher
        .call(v16::GetLocalListVersionRequest {}, std::slice::from_ref(&selector))
        .await
        .pop()
        .unwrap();
    let (_, session, call) = loopback.sent.lock()[0].clone();

    dispatcher
        .inbound()
        .on_frame(&origin(&selector, session), WireMessage::result(call.call_id(), json!({})))
        .await;

    assert!(matches!(handle.wait().await, Err(DispatchError::Decode(_))));
}

#[tokio::test]
async fn test_answers_are_scoped_to_their_session() {
    let (dispatcher, loopback) = loopback_dispatcher();
    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let handle = dispatcher
        .call(v16::GetLocalListVersionRequest {}, std::slice::from_ref(&selector))
        .await
        .pop()
        .unwrap();
    let (_, session, call) = loopback.sent.lock()[0].clone();

    // Same call id, different session
    let resolution = dispatcher
        .correlator()
        .resolve(SessionId::next(), WireMessage::result(call.call_id(), json!({"listVersion": 9})));
    assert_eq!(resolution, Resolution::Unmatched);

    let resolution = dispatcher
        .correlator()
        .resolve(session, WireMessage::result(call.call_id(), json!({"listVersion": 3})));
    assert_eq!(resolution, Resolution::Resolved);
    assert_eq!(handle.wait().await.unwrap().list_version, 3);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_expires_and_purges() {
    let correlator = Correlator::new(Duration::from_secs(10));
    let (dispatcher, _) = loopback_dispatcher();
    let shape = dispatcher
        .registry()
        .descriptor("ClearCache", ProtocolVersion::V16)
        .unwrap()
        .response;
    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let session = SessionId::next();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let rx = correlator
        .register(session, "s-1".into(), selector, "ClearCache", shape, deadline)
        .unwrap();

    tokio::time::advance(Duration::from_secs(6)).await;
    let report = correlator.sweep(tokio::time::Instant::now());
    assert_eq!(report.expired, 1);
    assert_eq!(rx.await.unwrap().unwrap_err(), DispatchError::TimedOut);

    tokio::time::advance(Duration::from_secs(11)).await;
    let report = correlator.sweep(tokio::time::Instant::now());
    assert_eq!(report.purged, 1);
    assert_eq!(report.expired, 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_with_zero_interval_keeps_running() {
    let config = DispatchConfig::default()
        .with_sweep_interval(Duration::ZERO)
        .with_call_timeout(Duration::from_secs(1));
    let (dispatcher, _) = loopback_dispatcher_with(config);
    let sweeper = dispatcher.spawn_sweeper();

    let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
    let _handles = dispatcher.call(v16::ClearCacheRequest {}, &[selector]).await;

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!sweeper.is_finished());
    assert_eq!(dispatcher.stats().timed_out, 1);
    assert_eq!(dispatcher.correlator().pending_count(), 0);
    sweeper.abort();
}
