use serial_test::serial;
use std::io::Write;

use labflow::config::Settings;

const CONFIG: &str = r#"
[application]
log_level = "debug"

[store]
snapshot_path = "/tmp/labflow-test.json"

[station]
request_timeout_ms = 2500

[monitor]
updates_interval_ms = 500
max_consecutive_failures = 10
"#;

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_load_from_file() {
    let file = write_config(CONFIG);
    let settings = Settings::load_from(file.path()).unwrap();

    assert_eq!(settings.application.log_level, "debug");
    assert_eq!(settings.application.log_format, "pretty");
    assert_eq!(
        settings.station.request_timeout(),
        Some(std::time::Duration::from_millis(2500))
    );
    assert_eq!(settings.monitor.updates_interval_ms, 500);
    assert_eq!(settings.monitor.run_tables_interval_ms, 10_000);
    assert_eq!(settings.monitor.max_consecutive_failures, Some(10));
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let settings = Settings::load_from(dir.path().join("absent.toml")).unwrap();
    assert_eq!(settings, Settings::default());
}

#[test]
#[serial]
fn test_env_overrides_file() {
    let file = write_config(CONFIG);
    std::env::set_var("LABFLOW_MONITOR__UPDATES_INTERVAL_MS", "250");
    std::env::set_var("LABFLOW_STATION__SCHEME", "https");
    let result = Settings::load_from(file.path());
    std::env::remove_var("LABFLOW_MONITOR__UPDATES_INTERVAL_MS");
    std::env::remove_var("LABFLOW_STATION__SCHEME");

    let settings = result.unwrap();
    assert_eq!(settings.monitor.updates_interval_ms, 250);
    assert_eq!(settings.station.scheme, "https");
}

#[test]
#[serial]
fn test_invalid_values_rejected() {
    let file = write_config("[station]\nscheme = \"ftp\"\n");
    let err = Settings::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("Invalid station scheme"));
}
