//! Configuration for the dispatch engine
//!
//! Built in code with `Default` and the `with_*` methods, or loaded from a
//! TOML file whose values override the defaults:
//!
//! ```toml
//! call_timeout_secs = 30
//! late_response_grace_secs = 60
//! sweep_interval_ms = 1000
//! heartbeat_interval_secs = 300
//!
//! [websocket]
//! bind_addr = "0.0.0.0:8180"
//! max_message_size = 65536
//! max_frame_size = 16384
//! subprotocols = ["ocpp1.6", "ocpp1.5"]
//!
//! [document]
//! http_timeout_secs = 30
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::ocpp::ProtocolVersion;

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Complete dispatch configuration
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Time an outbound call waits for its answer
    pub call_timeout: Duration,

    /// How long a finished call id stays reserved for late frames
    pub late_response_grace: Duration,

    /// Period of the pending-call sweeper
    pub sweep_interval: Duration,

    /// Heartbeat interval advertised in BootNotification responses (seconds)
    pub heartbeat_interval: i32,

    pub websocket: WebSocketConfig,

    pub document: DocumentConfig,
}

/// Persistent-connection transport settings
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// Listener address
    pub bind_addr: SocketAddr,

    /// Maximum message size in bytes
    pub max_message_size: usize,

    /// Maximum frame size in bytes
    pub max_frame_size: usize,

    /// Subprotocols accepted during the handshake, most preferred first
    pub subprotocols: Vec<ProtocolVersion>,
}

/// Document-exchange transport settings
#[derive(Debug, Clone)]
pub struct DocumentConfig {
    /// Timeout of one HTTP round trip
    pub http_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            late_response_grace: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(1),
            heartbeat_interval: 300,
            websocket: WebSocketConfig::default(),
            document: DocumentConfig::default(),
        }
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8180)),
            max_message_size: 64 * 1024,
            max_frame_size: 16 * 1024,
            subprotocols: vec![ProtocolVersion::V16, ProtocolVersion::V15],
        }
    }
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
        }
    }
}

impl DispatchConfig {
    /// Set the outbound call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Set the late-response grace window
    pub fn with_late_response_grace(mut self, grace: Duration) -> Self {
        self.late_response_grace = grace;
        self
    }

    /// Set the sweeper period
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Set the advertised heartbeat interval
    pub fn with_heartbeat_interval(mut self, secs: i32) -> Self {
        self.heartbeat_interval = secs;
        self
    }

    /// Set the WebSocket listener address
    pub fn with_bind_addr(mut self, addr: SocketAddr) -> Self {
        self.websocket.bind_addr = addr;
        self
    }

    /// Restrict and order the accepted subprotocols
    pub fn with_subprotocols(mut self, versions: Vec<ProtocolVersion>) -> Self {
        self.websocket.subprotocols = versions;
        self
    }

    /// Load a TOML file on top of the defaults
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let file: FileConfig = toml::from_str(text)?;
        file.apply(Self::default())
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    call_timeout_secs: Option<u64>,
    late_response_grace_secs: Option<u64>,
    sweep_interval_ms: Option<u64>,
    heartbeat_interval_secs: Option<i32>,
    websocket: FileWebSocketConfig,
    document: FileDocumentConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileWebSocketConfig {
    bind_addr: Option<SocketAddr>,
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
    subprotocols: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileDocumentConfig {
    http_timeout_secs: Option<u64>,
}

impl FileConfig {
    fn apply(self, mut config: DispatchConfig) -> Result<DispatchConfig, ConfigError> {
        if let Some(secs) = self.call_timeout_secs {
            if secs == 0 {
                return Err(ConfigError::Invalid("call_timeout_secs must be positive".into()));
            }
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.late_response_grace_secs {
            config.late_response_grace = Duration::from_secs(secs);
        }
        if let Some(ms) = self.sweep_interval_ms {
            if ms == 0 {
                return Err(ConfigError::Invalid("sweep_interval_ms must be positive".into()));
            }
            config.sweep_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = self.heartbeat_interval_secs {
            config.heartbeat_interval = secs;
        }

        let ws = self.websocket;
        if let Some(addr) = ws.bind_addr {
            config.websocket.bind_addr = addr;
        }
        if let Some(size) = ws.max_message_size {
            config.websocket.max_message_size = size;
        }
        if let Some(size) = ws.max_frame_size {
            config.websocket.max_frame_size = size;
        }
        if let Some(names) = ws.subprotocols {
            let versions = names
                .iter()
                .map(|name| name.parse::<ProtocolVersion>().map_err(ConfigError::Invalid))
                .collect::<Result<Vec<_>, _>>()?;
            if versions.is_empty() {
                return Err(ConfigError::Invalid("at least one subprotocol is required".into()));
            }
            config.websocket.subprotocols = versions;
        }

        if let Some(secs) = self.document.http_timeout_secs {
            config.document.http_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }
}
