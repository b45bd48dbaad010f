use super::serde_helpers::duration_millis;
use super::{ClientConfig, ConfigError};
use reqwest::header::{HeaderName, HeaderValue};
use url::Url;

pub const MAX_RETRIES_LIMIT: u32 = 10;
pub const MIN_TIMEOUT_MS: u64 = 1_000;
pub const MAX_TIMEOUT_MS: u64 = 60_000;
pub const MIN_FLUSH_INTERVAL_MS: u64 = 100;
pub const MIN_QUEUE_SIZE: usize = 1;

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate webhook URL
        if self.webhook_url.trim().is_empty() {
            return Err(ConfigError::MissingField("webhook_url"));
        }

        let url = Url::parse(&self.webhook_url).map_err(|e| {
            ConfigError::InvalidUrl(format!("'{}': {}", self.webhook_url, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "'{}': scheme must be http or https",
                self.webhook_url
            )));
        }

        if url.host_str().is_none_or(str::is_empty) {
            return Err(ConfigError::InvalidUrl(format!(
                "'{}': missing host",
                self.webhook_url
            )));
        }

        // Validate licence identity
        if self.license_id.trim().is_empty() {
            return Err(ConfigError::MissingField("license_id"));
        }

        if self.license_device.trim().is_empty() {
            return Err(ConfigError::MissingField("license_device"));
        }

        // Validate numeric ranges
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::OutOfRange {
                field: "max_retries",
                value: self.max_retries as u64,
                min: 0,
                max: MAX_RETRIES_LIMIT as u64,
            });
        }

        let timeout_ms = duration_millis(self.timeout);
        if !(MIN_TIMEOUT_MS..=MAX_TIMEOUT_MS).contains(&timeout_ms) {
            return Err(ConfigError::OutOfRange {
                field: "timeout_ms",
                value: timeout_ms,
                min: MIN_TIMEOUT_MS,
                max: MAX_TIMEOUT_MS,
            });
        }

        let flush_interval_ms = duration_millis(self.flush_interval);
        if flush_interval_ms < MIN_FLUSH_INTERVAL_MS {
            return Err(ConfigError::TooSmall {
                field: "flush_interval_ms",
                value: flush_interval_ms,
                min: MIN_FLUSH_INTERVAL_MS,
            });
        }

        if self.max_queue_size < MIN_QUEUE_SIZE {
            return Err(ConfigError::TooSmall {
                field: "max_queue_size",
                value: self.max_queue_size as u64,
                min: MIN_QUEUE_SIZE as u64,
            });
        }

        // Headers are forwarded verbatim, so they must be valid on the wire
        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| ConfigError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
            HeaderValue::from_str(value).map_err(|e| ConfigError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        }

        Ok(())
    }
}
