use super::retry::RetryPolicy;
use crate::config::serde_helpers::duration_millis;
use crate::config::{ClientConfig, ConfigError};
use futures::future::{BoxFuture, FutureExt};
use parking_lot::RwLock;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use reqwest::{Client, ClientBuilder};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HTTP error: {status} after {attempts} attempt(s)")]
    Http { status: u16, attempts: u32 },
    #[error("Request failed after {attempts} attempt(s): {message}")]
    Request { message: String, attempts: u32 },
    #[error("Request timed out after {timeout_ms}ms ({attempts} attempt(s))")]
    Timeout { timeout_ms: u64, attempts: u32 },
    #[error("Transport is closed")]
    Closed,
    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    pub fn attempts(&self) -> u32 {
        match self {
            TransportError::Http { attempts, .. }
            | TransportError::Request { attempts, .. }
            | TransportError::Timeout { attempts, .. } => *attempts,
            TransportError::Closed | TransportError::Encode(_) => 0,
        }
    }
}

/// Outcome of a successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub status: u16,
    pub attempts: u32,
}

/// JSON body posted to the webhook.
#[derive(Debug, Serialize)]
pub struct TransportPayload<'a> {
    pub event: &'a str,
    pub license_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license_name: Option<&'a str>,
    pub license_device: &'a str,
}

/// Anything that can deliver one compressed event.
#[cfg_attr(test, automock)]
pub trait EventSink: Send + Sync {
    fn send(&self, compressed: String) -> BoxFuture<'static, Result<Delivery, TransportError>>;

    /// Releases held resources; later sends fail with [`TransportError::Closed`].
    fn close(&self);
}

/// HTTP transport posting to the configured webhook with bounded retries.
#[derive(Debug, Clone)]
pub struct Transport {
    inner: Arc<TransportInner>,
}

#[derive(Debug)]
struct TransportInner {
    client: RwLock<Option<Client>>,
    url: Url,
    headers: HeaderMap,
    timeout: Duration,
    max_retries: u32,
    policy: RetryPolicy,
    license_id: String,
    license_name: Option<String>,
    license_device: String,
}

impl Transport {
    pub fn new(config: &ClientConfig) -> Result<Self, ConfigError> {
        Self::with_retry_policy(config, RetryPolicy::default())
    }

    pub fn with_retry_policy(
        config: &ClientConfig,
        policy: RetryPolicy,
    ) -> Result<Self, ConfigError> {
        let url = Url::parse(&config.webhook_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("'{}': {}", config.webhook_url, e)))?;

        let client = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(TransportInner {
                client: RwLock::new(Some(client)),
                url,
                headers: build_headers(config)?,
                timeout: config.timeout,
                max_retries: config.max_retries,
                policy,
                license_id: config.license_id.clone(),
                license_name: config.license_name.clone(),
                license_device: config.license_device.clone(),
            }),
        })
    }

    pub fn endpoint(&self) -> &str {
        self.inner.url.as_str()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.client.read().is_none()
    }

    /// Posts one compressed event, making up to `max_retries + 1` attempts.
    pub async fn send(&self, compressed: &str) -> Result<Delivery, TransportError> {
        self.inner.send(compressed).await
    }

    pub fn close(&self) {
        if self.inner.client.write().take().is_some() {
            debug!("Transport to {} closed", self.inner.url);
        }
    }
}

impl EventSink for Transport {
    fn send(&self, compressed: String) -> BoxFuture<'static, Result<Delivery, TransportError>> {
        let inner = Arc::clone(&self.inner);
        async move { inner.send(&compressed).await }.boxed()
    }

    fn close(&self) {
        Transport::close(self);
    }
}

impl TransportInner {
    async fn send(&self, compressed: &str) -> Result<Delivery, TransportError> {
        let body = serde_json::to_string(&TransportPayload {
            event: compressed,
            license_id: &self.license_id,
            license_name: self.license_name.as_deref(),
            license_device: &self.license_device,
        })?;

        let total_attempts = self.max_retries + 1;
        let mut attempt = 0;

        loop {
            let attempts = attempt + 1;
            match self.post_once(body.clone(), attempts).await {
                Ok(status) => {
                    debug!(status, attempts, "Event delivered to {}", self.url);
                    return Ok(Delivery { status, attempts });
                }
                Err(TransportError::Closed) => return Err(TransportError::Closed),
                Err(err) if attempts >= total_attempts => return Err(err),
                Err(err) => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        "Delivery attempt {}/{} failed: {}; retrying in {:?}",
                        attempts, total_attempts, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn post_once(&self, body: String, attempts: u32) -> Result<u16, TransportError> {
        // Clone out of the lock; never hold it across the request.
        let client = self.client.read().clone().ok_or(TransportError::Closed)?;

        let response = client
            .post(self.url.clone())
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout {
                        timeout_ms: duration_millis(self.timeout),
                        attempts,
                    }
                } else {
                    TransportError::Request {
                        message: e.to_string(),
                        attempts,
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(TransportError::Http {
                status: status.as_u16(),
                attempts,
            })
        }
    }
}

/// User-Agent, then caller headers, then a Content-Type callers cannot override.
pub fn build_headers(config: &ClientConfig) -> Result<HeaderMap, ConfigError> {
    let mut headers = HeaderMap::new();

    headers.insert(USER_AGENT, HeaderValue::from_static(crate::USER_AGENT));

    for (name, value) in &config.headers {
        let invalid = |reason: String| ConfigError::InvalidHeader {
            name: name.clone(),
            reason,
        };
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
        headers.insert(header_name, header_value);
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Ok(headers)
}
