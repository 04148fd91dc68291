//! Loading the dispatch configuration from TOML files

use std::io::Write;
use std::net::SocketAddr;
use std::time::Duration;

use tempfile::NamedTempFile;

use csms_dispatch::config::{ConfigError, DispatchConfig};
use csms_dispatch::ocpp::ProtocolVersion;

fn write_config(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_full_file() {
    let file = write_config(
        r#"
        call_timeout_secs = 15
        late_response_grace_secs = 0
        sweep_interval_ms = 250
        heartbeat_interval_secs = 900

        [websocket]
        bind_addr = "127.0.0.1:9000"
        max_message_size = 131072
        max_frame_size = 32768
        subprotocols = ["ocpp1.5", "ocpp1.6"]

        [document]
        http_timeout_secs = 5
        "#,
    );

    let config = DispatchConfig::from_toml_file(file.path()).unwrap();
    assert_eq!(config.call_timeout, Duration::from_secs(15));
    assert_eq!(config.late_response_grace, Duration::ZERO);
    assert_eq!(config.sweep_interval, Duration::from_millis(250));
    assert_eq!(config.heartbeat_interval, 900);

    assert_eq!(config.websocket.bind_addr, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
    assert_eq!(config.websocket.max_message_size, 128 * 1024);
    assert_eq!(config.websocket.max_frame_size, 32 * 1024);
    assert_eq!(
        config.websocket.subprotocols,
        vec![ProtocolVersion::V15, ProtocolVersion::V16]
    );
    assert_eq!(config.document.http_timeout, Duration::from_secs(5));
}

#[test]
fn test_empty_file_is_default() {
    let file = write_config("");
    let config = DispatchConfig::from_toml_file(file.path()).unwrap();
    let defaults = DispatchConfig::default();

    assert_eq!(config.call_timeout, defaults.call_timeout);
    assert_eq!(config.websocket.bind_addr, defaults.websocket.bind_addr);
    assert_eq!(config.websocket.subprotocols, defaults.websocket.subprotocols);
}

#[test]
fn test_rejected_files() {
    let file = write_config("sweep_interval_ms = 0");
    assert!(matches!(
        DispatchConfig::from_toml_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));

    let file = write_config("[websocket]\nsubprotocols = []");
    assert!(matches!(
        DispatchConfig::from_toml_file(file.path()),
        Err(ConfigError::Invalid(_))
    ));

    let file = write_config("[websocket]\nbind_addr = \"not an address\"");
    assert!(matches!(
        DispatchConfig::from_toml_file(file.path()),
        Err(ConfigError::Parse(_))
    ));

    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        DispatchConfig::from_toml_file(dir.path().join("missing.toml")),
        Err(ConfigError::Io(_))
    ));
}
