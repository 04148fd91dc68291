//! Persistence collaborator
//!
//! The dispatch core never owns device records or call history. It asks a
//! [`DeviceRepository`] how to reach a device and reports every finished call
//! back to it exactly once.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::correlator::CallState;
use crate::error::DispatchError;
use crate::ocpp::CallId;
use crate::transport::DeviceSelector;

/// Terminal record of one outbound call
#[derive(Debug, Clone, PartialEq)]
pub struct CallOutcome {
    pub device_id: String,
    pub action: String,
    /// One of `Resolved`, `Failed`, `TimedOut`
    pub state: CallState,
    pub error: Option<DispatchError>,
    pub completed_at: DateTime<Utc>,
}

/// Device lookup and call outcome sink
pub trait DeviceRepository: Send + Sync {
    fn lookup_device_selector(&self, device_id: &str) -> Option<DeviceSelector>;

    fn record_outcome(&self, call_id: &CallId, outcome: &CallOutcome);
}

/// Outcomes kept by [`InMemoryRepository::new`]
pub const DEFAULT_OUTCOME_LIMIT: usize = 1024;

/// Repository kept in memory, for tests and the demo node
///
/// Only the most recent outcomes are kept; older ones are dropped once the
/// limit is reached.
#[derive(Debug)]
pub struct InMemoryRepository {
    devices: RwLock<HashMap<String, DeviceSelector>>,
    outcomes: RwLock<VecDeque<(CallId, CallOutcome)>>,
    outcome_limit: usize,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::with_outcome_limit(DEFAULT_OUTCOME_LIMIT)
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `limit` outcomes; zero keeps none
    pub fn with_outcome_limit(limit: usize) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            outcomes: RwLock::new(VecDeque::new()),
            outcome_limit: limit,
        }
    }

    /// Add or replace how a device is reached
    pub fn register_device(&self, selector: DeviceSelector) {
        self.devices.write().insert(selector.device_id.clone(), selector);
    }

    pub fn remove_device(&self, device_id: &str) -> Option<DeviceSelector> {
        self.devices.write().remove(device_id)
    }

    /// Retained outcomes, oldest first
    pub fn outcomes(&self) -> Vec<(CallId, CallOutcome)> {
        self.outcomes.read().iter().cloned().collect()
    }

    pub fn outcome(&self, call_id: &str) -> Option<CallOutcome> {
        self.outcomes
            .read()
            .iter()
            .find(|(id, _)| id == call_id)
            .map(|(_, outcome)| outcome.clone())
    }
}

impl DeviceRepository for InMemoryRepository {
    fn lookup_device_selector(&self, device_id: &str) -> Option<DeviceSelector> {
        self.devices.read().get(device_id).cloned()
    }

    fn record_outcome(&self, call_id: &CallId, outcome: &CallOutcome) {
        if self.outcome_limit == 0 {
            return;
        }
        let mut outcomes = self.outcomes.write();
        while outcomes.len() >= self.outcome_limit {
            outcomes.pop_front();
        }
        outcomes.push_back((call_id.clone(), outcome.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocpp::ProtocolVersion;

    #[test]
    fn test_device_lookup() {
        let repo = InMemoryRepository::new();
        assert!(repo.lookup_device_selector("CP-1").is_none());

        repo.register_device(DeviceSelector::websocket("CP-1", ProtocolVersion::V16));
        let selector = repo.lookup_device_selector("CP-1").unwrap();
        assert_eq!(selector.protocol_version, ProtocolVersion::V16);

        repo.remove_device("CP-1");
        assert!(repo.lookup_device_selector("CP-1").is_none());
    }

    fn outcome(state: CallState) -> CallOutcome {
        CallOutcome {
            device_id: "CP-1".into(),
            action: "Reset".into(),
            state,
            error: None,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_outcomes_in_order() {
        let repo = InMemoryRepository::new();
        for (id, state) in [("a", CallState::Resolved), ("b", CallState::TimedOut)] {
            repo.record_outcome(&id.to_string(), &outcome(state));
        }
        let outcomes = repo.outcomes();
        assert_eq!(outcomes.len(), 2);
        assert_eq!(outcomes[1].0, "b");
        assert_eq!(repo.outcome("a").unwrap().state, CallState::Resolved);
    }

    #[test]
    fn test_outcome_limit_drops_oldest() {
        let repo = InMemoryRepository::with_outcome_limit(3);
        for i in 0..10 {
            repo.record_outcome(&format!("c-{}", i), &outcome(CallState::Resolved));
        }
        let ids: Vec<_> = repo.outcomes().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["c-7", "c-8", "c-9"]);
        assert!(repo.outcome("c-0").is_none());

        let silent = InMemoryRepository::with_outcome_limit(0);
        silent.record_outcome(&"c-1".to_string(), &outcome(CallState::Failed));
        assert!(silent.outcomes().is_empty());
    }

    #[test]
    fn test_default_limit() {
        let repo = InMemoryRepository::new();
        for i in 0..DEFAULT_OUTCOME_LIMIT + 5 {
            repo.record_outcome(&i.to_string(), &outcome(CallState::Resolved));
        }
        assert_eq!(repo.outcomes().len(), DEFAULT_OUTCOME_LIMIT);
    }
}
