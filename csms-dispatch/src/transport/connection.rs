//! Persistent connection state
//!
//! Only the WebSocket transport has connections. A document exchange owns a
//! single call for the duration of one round trip and never shows up here.

use chrono::{DateTime, Utc};

use super::SessionId;
use crate::ocpp::{CallId, ProtocolVersion};

/// Connection liveness
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Connected,
    Disconnected,
}

/// Snapshot of a device's persistent connection
#[derive(Debug, Clone, PartialEq)]
pub struct Connection {
    pub device_id: String,
    /// Negotiated during the handshake, fixed for the connection's lifetime
    pub protocol_version: ProtocolVersion,
    pub session: SessionId,
    pub liveness: Liveness,
    pub connected_at: DateTime<Utc>,
    pub disconnected_at: Option<DateTime<Utc>>,
    /// Calls awaiting an answer on this session
    pub pending: Vec<CallId>,
}

impl Connection {
    pub fn new(device_id: impl Into<String>, protocol_version: ProtocolVersion, session: SessionId) -> Self {
        Self {
            device_id: device_id.into(),
            protocol_version,
            session,
            liveness: Liveness::Connected,
            connected_at: Utc::now(),
            disconnected_at: None,
            pending: Vec::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.liveness == Liveness::Connected
    }

    pub fn mark_disconnected(&mut self) {
        self.liveness = Liveness::Disconnected;
        self.disconnected_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_liveness_transition() {
        let mut conn = Connection::new("CP-1", ProtocolVersion::V16, SessionId::next());
        assert!(conn.is_connected());
        assert!(conn.disconnected_at.is_none());

        conn.mark_disconnected();
        assert_eq!(conn.liveness, Liveness::Disconnected);
        assert!(conn.disconnected_at.is_some());
    }
}
