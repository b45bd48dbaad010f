pub mod serde_helpers;
mod validation;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use validation::{
    MAX_RETRIES_LIMIT, MAX_TIMEOUT_MS, MIN_FLUSH_INTERVAL_MS, MIN_QUEUE_SIZE, MIN_TIMEOUT_MS,
};

pub const DEFAULT_ENABLED: bool = true;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 50;

const ENV_PREFIX: &str = "ERROR_TRACKER_";

/// Raised synchronously while constructing a client; a client is never
/// created from a configuration that fails validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} is required and cannot be empty")]
    MissingField(&'static str),
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        field: &'static str,
        value: u64,
        min: u64,
    },
    #[error("Invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Everything a [`Client`](crate::Client) needs to ship events.
///
/// Immutable once handed to a client. Durations are expressed in
/// milliseconds on the wire (`timeout_ms`, `flush_interval_ms`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub webhook_url: String,
    pub license_id: String,
    pub license_name: Option<String>,
    pub license_device: String,
    pub app: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub enabled: bool,
    pub max_retries: u32,
    #[serde(rename = "timeout_ms", with = "serde_helpers")]
    pub timeout: Duration,
    #[serde(rename = "flush_interval_ms", with = "serde_helpers")]
    pub flush_interval: Duration,
    pub max_queue_size: usize,
    pub headers: BTreeMap<String, String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            license_id: String::new(),
            license_name: None,
            license_device: String::new(),
            app: None,
            version: None,
            platform: None,
            enabled: DEFAULT_ENABLED,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TIMEOUT,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            headers: BTreeMap::new(),
        }
    }
}

impl ClientConfig {
    /// Config with the three required fields set and defaults elsewhere.
    pub fn new(
        webhook_url: impl Into<String>,
        license_id: impl Into<String>,
        license_device: impl Into<String>,
    ) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            license_id: license_id.into(),
            license_device: license_device.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source)?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Overlays `ERROR_TRACKER_*` environment variables onto this config.
    pub fn apply_env_overrides(mut self) -> Result<Self, ConfigError> {
        let key = |name: &str| format!("{ENV_PREFIX}{name}");

        serde_helpers::load_env_string(&key("WEBHOOK_URL"), &mut self.webhook_url);
        serde_helpers::load_env_string(&key("LICENSE_ID"), &mut self.license_id);
        serde_helpers::load_env_string_opt(&key("LICENSE_NAME"), &mut self.license_name);
        serde_helpers::load_env_string(&key("LICENSE_DEVICE"), &mut self.license_device);
        serde_helpers::load_env_string_opt(&key("APP"), &mut self.app);
        serde_helpers::load_env_string_opt(&key("VERSION"), &mut self.version);
        serde_helpers::load_env_string_opt(&key("PLATFORM"), &mut self.platform);
        serde_helpers::load_env_var(&key("ENABLED"), &mut self.enabled)?;
        serde_helpers::load_env_var(&key("MAX_RETRIES"), &mut self.max_retries)?;
        serde_helpers::load_env_millis(&key("TIMEOUT_MS"), &mut self.timeout)?;
        serde_helpers::load_env_millis(&key("FLUSH_INTERVAL_MS"), &mut self.flush_interval)?;
        serde_helpers::load_env_var(&key("MAX_QUEUE_SIZE"), &mut self.max_queue_size)?;

        Ok(self)
    }

    /// Trims licence and descriptive strings; blank optionals become `None`.
    pub fn sanitize(mut self) -> Self {
        fn trim_opt(value: Option<String>) -> Option<String> {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        }

        self.webhook_url = self.webhook_url.trim().to_string();
        self.license_id = self.license_id.trim().to_string();
        self.license_device = self.license_device.trim().to_string();
        self.license_name = trim_opt(self.license_name);
        self.app = trim_opt(self.app);
        self.version = trim_opt(self.version);
        self.platform = trim_opt(self.platform);
        self
    }
}
