//! Configuration files on disk

use hub::config::{HubConfig, HubProtocol, TransportKind};
use tempfile::TempDir;

#[test]
fn test_save_and_load_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("hub.toml");

    let mut config = HubConfig::default();
    config.hub.protocol = HubProtocol::Nxt;
    config.hub.log_level = "debug".to_string();
    config.transport.kind = TransportKind::Bridge;
    config.timing.max_send_rate = Some(25);
    config.transfer.chunk_size = 16;
    config.save(&path).unwrap();

    let loaded = HubConfig::load(Some(path)).unwrap();
    assert_eq!(loaded.hub.protocol, HubProtocol::Nxt);
    assert_eq!(loaded.hub.log_level, "debug");
    assert_eq!(loaded.transport.kind, TransportKind::Bridge);
    assert_eq!(loaded.max_send_rate(), 25);
    assert_eq!(loaded.transfer.chunk_size, 16);
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hub.toml");
    std::fs::write(
        &path,
        r#"
[hub]
log_level = "loud"
"#,
    )
    .unwrap();

    let err = HubConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Invalid log level"));
}

#[test]
fn test_load_reports_parse_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("hub.toml");
    std::fs::write(&path, "[hub\nlog_level = ").unwrap();

    let err = HubConfig::load(Some(path)).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn test_missing_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let result = HubConfig::load(Some(dir.path().join("absent.toml")));
    assert!(result.is_err());
}
