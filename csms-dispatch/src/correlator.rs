//! Call correlator
//!
//! Owns every outbound call from registration until its single terminal
//! transition:
//!
//! ```text
//! Created ──sent──► AwaitingResponse ──► Resolved | Failed | TimedOut
//! ```
//!
//! The pending table is keyed by `(session, call id)`. A terminal transition
//! takes the entry out under the lock and leaves a tombstone in its place;
//! decoding and delivery happen after the lock is released. Whichever of an
//! inbound answer, a cancel, a deadline or a sweep takes the entry first
//! decides the outcome, the others find a tombstone.
//!
//! Tombstones keep the call id reserved for the grace window. Frames hitting
//! a tombstone are logged and counted: `duplicate` when the call was already
//! answered, `late` when it was not (timed out, cancelled, failed locally).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::DispatchError;
use crate::ocpp::{CallId, OcppResponse, WireMessage};
use crate::persistence::{CallOutcome, DeviceRepository};
use crate::registry::ResponseShape;
use crate::transport::{DeviceSelector, SessionId};

/// What a caller eventually receives
pub type CallReply = Result<OcppResponse, DispatchError>;

/// Lifecycle of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    /// Registered, not yet handed to the transport
    Created,
    /// Sent, waiting for the device
    AwaitingResponse,
    /// Answered with a CALLRESULT matching the expected shape
    Resolved,
    /// Answered with a CALLERROR, undecodable, cancelled or lost
    Failed,
    /// Deadline passed without an answer
    TimedOut,
}

impl CallState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CallState::Resolved | CallState::Failed | CallState::TimedOut)
    }
}

/// A call owned by the correlator until it reaches a terminal state
#[derive(Debug)]
pub struct PendingCall {
    pub call_id: CallId,
    pub selector: DeviceSelector,
    pub action: &'static str,
    /// Fixed by `(request shape, version)` at registration
    pub response: ResponseShape,
    pub deadline: Instant,
    pub state: CallState,
    result_tx: oneshot::Sender<CallReply>,
}

#[derive(Debug)]
struct Tombstone {
    until: Instant,
    answered: bool,
}

#[derive(Debug)]
enum Entry {
    Live(PendingCall),
    Retired(Tombstone),
}

enum Lookup {
    Live(PendingCall),
    Retired { answered: bool },
    Missing,
}

/// What happened to an inbound answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Delivered as a typed response
    Resolved,
    /// Delivered as an error (CALLERROR or decode failure)
    Failed,
    /// The call had already ended without an answer; discarded
    Late,
    /// The call had already been answered; discarded
    Duplicate,
    /// No call with this id on this session
    Unmatched,
}

/// Counter snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub registered: u64,
    pub resolved: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub late: u64,
    pub duplicate: u64,
    pub unmatched: u64,
}

#[derive(Debug, Default)]
struct Counters {
    registered: AtomicU64,
    resolved: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    late: AtomicU64,
    duplicate: AtomicU64,
    unmatched: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Result of one sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Live calls moved to `TimedOut`
    pub expired: usize,
    /// Tombstones whose grace window ended
    pub purged: usize,
}

/// Pending-call table with deadlines and tombstones
pub struct Correlator {
    table: Mutex<HashMap<(SessionId, CallId), Entry>>,
    grace: Duration,
    counters: Counters,
    recorder: Option<Arc<dyn DeviceRepository>>,
}

impl Correlator {
    pub fn new(grace: Duration) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            grace,
            counters: Counters::default(),
            recorder: None,
        }
    }

    /// Report every terminal transition to `recorder`
    pub fn with_recorder(mut self, recorder: Arc<dyn DeviceRepository>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Park a new call; the receiver yields its single outcome
    pub fn register(
        &self,
        session: SessionId,
        call_id: CallId,
        selector: DeviceSelector,
        action: &'static str,
        response: ResponseShape,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<CallReply>, DispatchError> {
        let now = Instant::now();
        let (result_tx, result_rx) = oneshot::channel();
        let key = (session, call_id);

        let mut table = self.table.lock();
        match table.get(&key) {
            Some(Entry::Live(_)) => return Err(DispatchError::CallIdInUse(key.1)),
            Some(Entry::Retired(tombstone)) if tombstone.until > now => {
                return Err(DispatchError::CallIdInUse(key.1))
            }
            _ => {}
        }

        debug!("Registered call {} ({}) on {} to {}", key.1, action, session, selector);
        let call = PendingCall {
            call_id: key.1.clone(),
            selector,
            action,
            response,
            deadline,
            state: CallState::Created,
            result_tx,
        };
        table.insert(key, Entry::Live(call));
        drop(table);

        bump(&self.counters.registered);
        Ok(result_rx)
    }

    /// `Created → AwaitingResponse` once the transport accepted the CALL
    pub fn mark_sent(&self, session: SessionId, call_id: &str) {
        let mut table = self.table.lock();
        if let Some(Entry::Live(call)) = table.get_mut(&(session, call_id.to_string())) {
            if call.state == CallState::Created {
                call.state = CallState::AwaitingResponse;
            }
        }
    }

    /// Match an inbound CALLRESULT or CALLERROR to its call
    pub fn resolve(&self, session: SessionId, message: WireMessage) -> Resolution {
        let (call_id, answer) = match message {
            WireMessage::CallResult { call_id, payload } => (call_id, Ok(payload)),
            WireMessage::CallError {
                call_id,
                code,
                description,
                details,
            } => (
                call_id,
                Err(DispatchError::Protocol {
                    code,
                    description,
                    details,
                }),
            ),
            WireMessage::Call { call_id, .. } => {
                warn!("CALL {} handed to the correlator, ignoring", call_id);
                bump(&self.counters.unmatched);
                return Resolution::Unmatched;
            }
        };

        match self.retire(session, &call_id, true) {
            Lookup::Live(call) => match answer {
                Ok(payload) => match call.response.decode(payload) {
                    Ok(response) => {
                        debug!("Call {} ({}) resolved", call_id, call.action);
                        self.finish(call, CallState::Resolved, Ok(response));
                        Resolution::Resolved
                    }
                    Err(e) => {
                        warn!(
                            "Response to call {} does not decode as {}: {}",
                            call_id, call.response.name, e
                        );
                        self.finish(call, CallState::Failed, Err(e.into()));
                        Resolution::Failed
                    }
                },
                Err(err) => {
                    info!("Call {} ({}) answered with error: {}", call_id, call.action, err);
                    self.finish(call, CallState::Failed, Err(err));
                    Resolution::Failed
                }
            },
            Lookup::Retired { answered: true } => {
                warn!("Duplicate response for call {} on {}, discarded", call_id, session);
                bump(&self.counters.duplicate);
                Resolution::Duplicate
            }
            Lookup::Retired { answered: false } => {
                warn!("Late response for call {} on {}, discarded", call_id, session);
                bump(&self.counters.late);
                Resolution::Late
            }
            Lookup::Missing => {
                warn!("Response for unknown call {} on {}, discarded", call_id, session);
                bump(&self.counters.unmatched);
                Resolution::Unmatched
            }
        }
    }

    /// Fail a live call; false if it already ended
    pub fn fail(&self, session: SessionId, call_id: &str, error: DispatchError) -> bool {
        match self.retire(session, call_id, false) {
            Lookup::Live(call) => {
                warn!("Call {} ({}) failed: {}", call_id, call.action, error);
                self.finish(call, CallState::Failed, Err(error));
                true
            }
            _ => false,
        }
    }

    /// Cancel a live call; false if it already ended
    pub fn cancel(&self, session: SessionId, call_id: &str) -> bool {
        match self.retire(session, call_id, false) {
            Lookup::Live(call) => {
                info!("Call {} ({}) cancelled", call_id, call.action);
                self.finish(call, CallState::Failed, Err(DispatchError::Cancelled));
                true
            }
            _ => false,
        }
    }

    /// Time out a live call; false if it already ended
    pub fn expire(&self, session: SessionId, call_id: &str) -> bool {
        match self.retire(session, call_id, false) {
            Lookup::Live(call) => {
                warn!("Call {} ({}) to {} timed out", call_id, call.action, call.selector.device_id);
                self.finish(call, CallState::TimedOut, Err(DispatchError::TimedOut));
                true
            }
            _ => false,
        }
    }

    /// Expire overdue calls and purge tombstones past their grace window
    pub fn sweep(&self, now: Instant) -> SweepReport {
        let mut expired = Vec::new();
        let purged;
        {
            let mut table = self.table.lock();
            let overdue: Vec<_> = table
                .iter()
                .filter_map(|(key, entry)| match entry {
                    Entry::Live(call) if call.deadline <= now => Some(key.clone()),
                    _ => None,
                })
                .collect();
            for key in overdue {
                let tombstone = Entry::Retired(Tombstone {
                    until: now + self.grace,
                    answered: false,
                });
                if let Some(Entry::Live(call)) = table.insert(key, tombstone) {
                    expired.push(call);
                }
            }

            let before = table.len();
            table.retain(|_, entry| !matches!(entry, Entry::Retired(t) if t.until <= now));
            purged = before - table.len();
        }

        let report = SweepReport {
            expired: expired.len(),
            purged,
        };
        for call in expired {
            warn!("Call {} ({}) to {} timed out", call.call_id, call.action, call.selector.device_id);
            self.finish(call, CallState::TimedOut, Err(DispatchError::TimedOut));
        }
        if report.expired > 0 || report.purged > 0 {
            debug!("Sweep expired {} calls, purged {} tombstones", report.expired, report.purged);
        }
        report
    }

    /// Fail every live call of a session, e.g. on connection loss
    pub fn fail_session(&self, session: SessionId, error: DispatchError) -> usize {
        let now = Instant::now();
        let mut failed = Vec::new();
        {
            let mut table = self.table.lock();
            let keys: Vec<_> = table
                .iter()
                .filter_map(|(key, entry)| match entry {
                    Entry::Live(_) if key.0 == session => Some(key.clone()),
                    _ => None,
                })
                .collect();
            for key in keys {
                let tombstone = Entry::Retired(Tombstone {
                    until: now + self.grace,
                    answered: false,
                });
                if let Some(Entry::Live(call)) = table.insert(key, tombstone) {
                    failed.push(call);
                }
            }
        }

        let count = failed.len();
        if count > 0 {
            warn!("Failing {} pending calls on {}: {}", count, session, error);
        }
        for call in failed {
            self.finish(call, CallState::Failed, Err(error.clone()));
        }
        count
    }

    /// Number of live calls
    pub fn pending_count(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|entry| matches!(entry, Entry::Live(_)))
            .count()
    }

    /// Live call ids of one session, sorted
    pub fn pending_for_session(&self, session: SessionId) -> Vec<CallId> {
        let mut ids: Vec<_> = self
            .table
            .lock()
            .iter()
            .filter_map(|((s, id), entry)| match entry {
                Entry::Live(_) if *s == session => Some(id.clone()),
                _ => None,
            })
            .collect();
        ids.sort();
        ids
    }

    /// State of a live call, `None` once it ended
    pub fn state(&self, session: SessionId, call_id: &str) -> Option<CallState> {
        match self.table.lock().get(&(session, call_id.to_string())) {
            Some(Entry::Live(call)) => Some(call.state),
            _ => None,
        }
    }

    pub fn stats(&self) -> CorrelatorStats {
        let c = &self.counters;
        CorrelatorStats {
            registered: c.registered.load(Ordering::Relaxed),
            resolved: c.resolved.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            timed_out: c.timed_out.load(Ordering::Relaxed),
            late: c.late.load(Ordering::Relaxed),
            duplicate: c.duplicate.load(Ordering::Relaxed),
            unmatched: c.unmatched.load(Ordering::Relaxed),
        }
    }

    // Swap a live entry for a tombstone and hand the call out.
    fn retire(&self, session: SessionId, call_id: &str, answered: bool) -> Lookup {
        let key = (session, call_id.to_string());
        let mut table = self.table.lock();
        match table.get(&key) {
            None => return Lookup::Missing,
            Some(Entry::Retired(tombstone)) => {
                return Lookup::Retired {
                    answered: tombstone.answered,
                }
            }
            Some(Entry::Live(_)) => {}
        }
        let tombstone = Entry::Retired(Tombstone {
            until: Instant::now() + self.grace,
            answered,
        });
        match table.insert(key, tombstone) {
            Some(Entry::Live(call)) => Lookup::Live(call),
            _ => Lookup::Missing,
        }
    }

    fn finish(&self, mut call: PendingCall, state: CallState, reply: CallReply) {
        call.state = state;
        match state {
            CallState::Resolved => bump(&self.counters.resolved),
            CallState::TimedOut => bump(&self.counters.timed_out),
            _ => bump(&self.counters.failed),
        }

        if let Some(recorder) = &self.recorder {
            let outcome = CallOutcome {
                device_id: call.selector.device_id.clone(),
                action: call.action.to_string(),
                state,
                error: reply.as_ref().err().cloned(),
                completed_at: Utc::now(),
            };
            recorder.record_outcome(&call.call_id, &outcome);
        }

        if call.result_tx.send(reply).is_err() {
            debug!("Caller of {} gone before its outcome arrived", call.call_id);
        }
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("grace", &self.grace)
            .field("pending", &self.pending_count())
            .field("stats", &self.stats())
            .finish()
    }
}
