//! Per-selector result handles

use std::marker::PhantomData;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::correlator::{CallReply, Correlator};
use crate::error::{DecodeError, DispatchError};
use crate::ocpp::{CallId, OcppResponse, TypedResponse};
use crate::transport::{DeviceSelector, SessionId};

enum Slot {
    Pending {
        session: SessionId,
        call_id: CallId,
        deadline: Instant,
        rx: oneshot::Receiver<CallReply>,
        correlator: Arc<Correlator>,
    },
    Failed(DispatchError),
}

/// Outcome of one call to one device
///
/// Awaited independently of the handles of other selectors. The handle arms
/// its own deadline, so a timeout is delivered without waiting for the next
/// sweep.
pub struct CallHandle<T = OcppResponse> {
    selector: DeviceSelector,
    slot: Slot,
    _response: PhantomData<fn() -> T>,
}

impl<T: TypedResponse> CallHandle<T> {
    pub(crate) fn pending(
        selector: DeviceSelector,
        session: SessionId,
        call_id: CallId,
        deadline: Instant,
        rx: oneshot::Receiver<CallReply>,
        correlator: Arc<Correlator>,
    ) -> Self {
        Self {
            selector,
            slot: Slot::Pending {
                session,
                call_id,
                deadline,
                rx,
                correlator,
            },
            _response: PhantomData,
        }
    }

    /// A call that failed before anything was sent
    pub(crate) fn failed(selector: DeviceSelector, error: DispatchError) -> Self {
        Self {
            selector,
            slot: Slot::Failed(error),
            _response: PhantomData,
        }
    }

    /// Narrow the response type; used by typed calls
    pub(crate) fn typed<U: TypedResponse>(self) -> CallHandle<U> {
        CallHandle {
            selector: self.selector,
            slot: self.slot,
            _response: PhantomData,
        }
    }

    pub fn selector(&self) -> &DeviceSelector {
        &self.selector
    }

    /// Call id on the wire, `None` if the call failed before one was assigned
    pub fn call_id(&self) -> Option<&str> {
        match &self.slot {
            Slot::Pending { call_id, .. } => Some(call_id),
            Slot::Failed(_) => None,
        }
    }

    pub fn session(&self) -> Option<SessionId> {
        match &self.slot {
            Slot::Pending { session, .. } => Some(*session),
            Slot::Failed(_) => None,
        }
    }

    /// Cancel the call; false if it already finished
    pub fn cancel(&self) -> bool {
        match &self.slot {
            Slot::Pending {
                session,
                call_id,
                correlator,
                ..
            } => correlator.cancel(*session, call_id),
            Slot::Failed(_) => false,
        }
    }

    /// Cancel from another task
    pub fn canceller(&self) -> Option<Canceller> {
        match &self.slot {
            Slot::Pending {
                session,
                call_id,
                correlator,
                ..
            } => Some(Canceller {
                session: *session,
                call_id: call_id.clone(),
                correlator: correlator.clone(),
            }),
            Slot::Failed(_) => None,
        }
    }

    /// Wait for the typed response or the call's error
    pub async fn wait(self) -> Result<T, DispatchError> {
        let (session, call_id, deadline, mut rx, correlator) = match self.slot {
            Slot::Failed(error) => return Err(error),
            Slot::Pending {
                session,
                call_id,
                deadline,
                rx,
                correlator,
            } => (session, call_id, deadline, rx, correlator),
        };

        let reply = tokio::select! {
            reply = &mut rx => reply,
            _ = tokio::time::sleep_until(deadline) => {
                // Whoever retires the call first wins; the outcome is in rx either way
                correlator.expire(session, &call_id);
                rx.await
            }
        };

        let response = reply.map_err(|_| DispatchError::Cancelled)??;
        T::from_response(response).map_err(|other| {
            DispatchError::Decode(DecodeError::TypeMismatch {
                detail: format!("unexpected response shape {}", other.shape()),
            })
        })
    }
}

impl<T> std::fmt::Debug for CallHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("CallHandle");
        s.field("selector", &self.selector);
        match &self.slot {
            Slot::Pending { session, call_id, .. } => s.field("session", session).field("call_id", call_id),
            Slot::Failed(error) => s.field("error", error),
        };
        s.finish()
    }
}

/// Detached cancel capability of a [`CallHandle`]
#[derive(Clone)]
pub struct Canceller {
    session: SessionId,
    call_id: CallId,
    correlator: Arc<Correlator>,
}

impl Canceller {
    pub fn cancel(&self) -> bool {
        self.correlator.cancel(self.session, &self.call_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::{v16, ProtocolVersion, ReservationStatus, WireMessage};
    use crate::registry::SchemaRegistry;
    use serde_json::json;
    use std::time::Duration;

    fn pending_handle(correlator: &Arc<Correlator>, timeout: Duration) -> CallHandle<v16::ReserveNowResponse> {
        let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
        let shape = SchemaRegistry::new()
            .descriptor("ReserveNow", ProtocolVersion::V16)
            .unwrap()
            .response;
        let session = SessionId::next();
        let deadline = Instant::now() + timeout;
        let rx = correlator
            .register(session, "c-1".into(), selector.clone(), "ReserveNow", shape, deadline)
            .unwrap();
        CallHandle::pending(selector, session, "c-1".into(), deadline, rx, correlator.clone())
    }

    #[tokio::test]
    async fn test_wait_returns_typed_response() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(60)));
        let handle = pending_handle(&correlator, Duration::from_secs(30));
        let session = handle.session().unwrap();

        correlator.resolve(session, WireMessage::result("c-1", json!({"status": "Occupied"})));
        let response = handle.wait().await.unwrap();
        assert_eq!(response.status, ReservationStatus::Occupied);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_arms_its_own_deadline() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(60)));
        let handle = pending_handle(&correlator, Duration::from_secs(30));

        assert_eq!(handle.wait().await.unwrap_err(), DispatchError::TimedOut);
        assert_eq!(correlator.pending_count(), 0);
        assert_eq!(correlator.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_cancel_delivers_cancelled_once() {
        let correlator = Arc::new(Correlator::new(Duration::from_secs(60)));
        let handle = pending_handle(&correlator, Duration::from_secs(30));
        let canceller = handle.canceller().unwrap();

        assert!(canceller.cancel());
        assert!(!handle.cancel());
        assert_eq!(handle.wait().await.unwrap_err(), DispatchError::Cancelled);
    }

    #[tokio::test]
    async fn test_failed_handle() {
        let selector = DeviceSelector::websocket("CP-1", ProtocolVersion::V16);
        let handle: CallHandle = CallHandle::failed(selector, DispatchError::UnknownDevice("CP-1".into()));
        assert!(handle.call_id().is_none());
        assert!(!handle.cancel());
        assert_eq!(
            handle.wait().await.unwrap_err(),
            DispatchError::UnknownDevice("CP-1".into())
        );
    }
}
