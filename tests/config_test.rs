use error_tracker::{Client, ClientConfig, ConfigError};
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

const ENV_KEYS: &[&str] = &[
    "ERROR_TRACKER_WEBHOOK_URL",
    "ERROR_TRACKER_LICENSE_ID",
    "ERROR_TRACKER_LICENSE_NAME",
    "ERROR_TRACKER_LICENSE_DEVICE",
    "ERROR_TRACKER_MAX_RETRIES",
    "ERROR_TRACKER_TIMEOUT_MS",
    "ERROR_TRACKER_FLUSH_INTERVAL_MS",
    "ERROR_TRACKER_MAX_QUEUE_SIZE",
    "ERROR_TRACKER_ENABLED",
];

fn clear_env() {
    for key in ENV_KEYS {
        // SAFETY: serialized tests; no other thread reads the environment here.
        unsafe { std::env::remove_var(key) };
    }
}

fn set_env(key: &str, value: &str) {
    // SAFETY: serialized tests; no other thread reads the environment here.
    unsafe { std::env::set_var(key, value) };
}

#[test]
fn test_loads_config_from_toml_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
webhook_url = "https://hooks.example.com/ingest"
license_id = "lic-42"
license_name = "Acme"
license_device = "pos-7"
app = "checkout"
version = "2.1.0"
max_retries = 5
timeout_ms = 3000
flush_interval_ms = 750
max_queue_size = 20

[headers]
X-Api-Key = "k"
"#
    )
    .unwrap();

    let config = ClientConfig::from_file(file.path()).unwrap();

    assert_eq!(config.license_name.as_deref(), Some("Acme"));
    assert_eq!(config.app.as_deref(), Some("checkout"));
    assert_eq!(config.max_retries, 5);
    assert_eq!(config.timeout, Duration::from_millis(3_000));
    assert_eq!(config.flush_interval, Duration::from_millis(750));
    assert_eq!(config.max_queue_size, 20);
    assert_eq!(config.headers["X-Api-Key"], "k");
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_file_and_bad_toml_are_errors() {
    assert!(matches!(
        ClientConfig::from_file("/definitely/not/here.toml"),
        Err(ConfigError::FileError(_))
    ));
    assert!(matches!(
        ClientConfig::from_toml_str("max_retries = \"many\""),
        Err(ConfigError::ParseError(_))
    ));
}

#[test]
fn test_serializes_durations_as_millis() {
    let config = ClientConfig::new("https://hooks.example.com", "L", "D");

    let text = toml::to_string(&config).unwrap();

    assert!(text.contains("timeout_ms = 10000"), "{text}");
    assert!(text.contains("flush_interval_ms = 5000"), "{text}");
    assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), config);
}

#[test]
#[serial]
fn test_env_overrides_file_values() {
    clear_env();
    set_env("ERROR_TRACKER_LICENSE_ID", " env-license ");
    set_env("ERROR_TRACKER_MAX_QUEUE_SIZE", "8");
    set_env("ERROR_TRACKER_TIMEOUT_MS", "2500");
    set_env("ERROR_TRACKER_ENABLED", "false");

    let config = ClientConfig::new("https://hooks.example.com", "file-license", "D")
        .apply_env_overrides()
        .unwrap()
        .sanitize();
    clear_env();

    assert_eq!(config.license_id, "env-license");
    assert_eq!(config.max_queue_size, 8);
    assert_eq!(config.timeout, Duration::from_millis(2_500));
    assert!(!config.enabled);
    assert_eq!(config.license_device, "D");
}

#[test]
#[serial]
fn test_unparseable_env_value_is_reported() {
    clear_env();
    set_env("ERROR_TRACKER_MAX_RETRIES", "lots");

    let result = ClientConfig::default().apply_env_overrides();
    clear_env();

    match result {
        Err(ConfigError::EnvError(message)) => {
            assert!(message.contains("ERROR_TRACKER_MAX_RETRIES"), "{message}");
        }
        other => panic!("Expected EnvError, got: {other:?}"),
    }
}

#[test]
fn test_client_trims_license_fields() {
    let client = Client::new(ClientConfig {
        license_name: Some("  ".to_string()),
        ..ClientConfig::new(" https://hooks.example.com/ingest ", " L ", " D ")
    })
    .unwrap();

    assert_eq!(client.config().license_id, "L");
    assert_eq!(client.config().license_device, "D");
    assert_eq!(client.config().license_name, None);
}

#[test]
fn test_validation_reports_field_names() {
    let err = ClientConfig {
        timeout: Duration::from_millis(70_000),
        ..ClientConfig::new("https://hooks.example.com", "L", "D")
    }
    .validate()
    .unwrap_err();

    assert!(err.to_string().contains("timeout_ms"), "{err}");
}
