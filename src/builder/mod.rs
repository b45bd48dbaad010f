pub mod safe_json;

use crate::config::ClientConfig;
use crate::domain::{
    Event, EventContext, EventLevel, Fault, Metadata, SerializedError, StructuredFault, Value,
};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value as Json};
use thiserror::Error;
use uuid::Uuid;

pub use safe_json::{CIRCULAR_REFERENCE_PLACEHOLDER, Sanitizer, safe_stringify};

const UNKNOWN: &str = "Unknown";
const RESERVED_FAULT_KEYS: &[&str] = &["name", "message", "stack"];

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("event title is empty")]
    EmptyTitle,
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Descriptive context stamped onto every event.
#[derive(Debug, Clone, Default)]
pub struct EventBuilderConfig {
    pub app: Option<String>,
    pub version: Option<String>,
    pub platform: Option<String>,
    pub device: Option<String>,
}

impl From<&ClientConfig> for EventBuilderConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            app: config.app.clone(),
            version: config.version.clone(),
            platform: config.platform.clone(),
            device: Some(config.license_device.clone()),
        }
    }
}

/// Turns reported faults into immutable [`Event`]s and events into wire JSON.
#[derive(Debug, Clone)]
pub struct EventBuilder {
    app: Option<String>,
    version: Option<String>,
    platform: String,
    device: String,
}

impl EventBuilder {
    /// Missing platform/device fall back to the OS name and host name.
    pub fn new(config: EventBuilderConfig) -> Self {
        Self {
            app: config.app,
            version: config.version,
            platform: config.platform.unwrap_or_else(default_platform),
            device: config.device.unwrap_or_else(default_device),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(EventBuilderConfig::from(config))
    }

    pub fn build(
        &self,
        title: &str,
        fault: &Fault,
        level: EventLevel,
        extra: Option<Metadata>,
    ) -> Result<Event, BuildError> {
        if title.trim().is_empty() {
            return Err(BuildError::EmptyTitle);
        }

        // Caller graphs stay writable; the event keeps its own copy.
        let mut sanitizer = Sanitizer::new();
        let mut event = self.serialize(title, fault);
        event.extra = event.extra.map(|extra| sanitizer.snapshot(&extra));
        let extra = extra.map(|extra| sanitizer.snapshot(&extra));
        let tags = tags(&event.name, fault);

        Ok(Event {
            event_id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            level,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            context: EventContext {
                culprit: culprit(fault),
                extra,
                platform: Some(self.platform.clone()),
                app: self.app.clone(),
                version: self.version.clone(),
                device: Some(self.device.clone()),
                tags,
            },
            event,
        })
    }

    /// Normalizes either fault shape through one path.
    pub fn serialize(&self, title: &str, fault: &Fault) -> SerializedError {
        match fault {
            Fault::Structured(fault) => serialize_structured(title, fault),
            Fault::Raw(map) => serialize_raw(title, map),
        }
    }

    /// Canonical wire JSON; absent optionals are omitted.
    pub fn stringify(&self, event: &Event) -> Result<String, BuildError> {
        let mut sanitizer = Sanitizer::new();

        let wire = WireEvent {
            event_id: &event.event_id,
            title: &event.title,
            level: event.level,
            event: WireError {
                name: &event.event.name,
                message: &event.event.message,
                stack: event.event.stack.as_deref(),
                extra: event.event.extra.as_ref().map(|m| sanitizer.metadata(m)),
            },
            context: WireContext {
                culprit: &event.context.culprit,
                extra: event.context.extra.as_ref().map(|m| sanitizer.metadata(m)),
                platform: event.context.platform.as_deref(),
                app: event.context.app.as_deref(),
                version: event.context.version.as_deref(),
                device: event.context.device.as_deref(),
                tags: &event.context.tags,
            },
            timestamp: &event.timestamp,
        };

        Ok(serde_json::to_string(&wire)?)
    }
}

#[derive(Serialize)]
struct WireEvent<'a> {
    event_id: &'a str,
    title: &'a str,
    level: EventLevel,
    event: WireError<'a>,
    context: WireContext<'a>,
    timestamp: &'a str,
}

#[derive(Serialize)]
struct WireError<'a> {
    name: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    stack: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra: Option<Map<String, Json>>,
}

#[derive(Serialize)]
struct WireContext<'a> {
    culprit: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    extra: Option<Map<String, Json>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    app: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    device: Option<&'a str>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    tags: &'a [String],
}

fn serialize_structured(title: &str, fault: &StructuredFault) -> SerializedError {
    let mut extra = fault.fields.clone();
    for key in RESERVED_FAULT_KEYS {
        extra.remove(*key);
    }
    if let Some(code) = &fault.code {
        extra.insert("code".to_string(), Value::String(code.clone()));
    }
    if let Some(cause) = &fault.cause {
        extra.insert("cause".to_string(), Value::Fault(cause.clone()));
    }

    SerializedError {
        name: non_blank(&fault.name).unwrap_or(UNKNOWN).to_string(),
        message: fault.message().unwrap_or(title).to_string(),
        stack: fault.stack.clone(),
        extra: (!extra.is_empty()).then_some(extra),
    }
}

fn serialize_raw(title: &str, map: &Metadata) -> SerializedError {
    let text = |key: &str| map.get(key).and_then(Value::as_str).and_then(non_blank);

    let extra: Metadata = map
        .iter()
        .filter(|(key, _)| !RESERVED_FAULT_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();

    SerializedError {
        name: text("name").unwrap_or(UNKNOWN).to_string(),
        message: text("message").unwrap_or(title).to_string(),
        stack: text("stack").map(str::to_string),
        extra: (!extra.is_empty()).then_some(extra),
    }
}

/// First stack frame, else the fault's type name, else `"Unknown"`.
pub fn culprit(fault: &Fault) -> String {
    match fault {
        Fault::Structured(fault) => fault
            .frames
            .first()
            .map(|frame| frame.function.as_str())
            .filter(|function| !function.is_empty())
            .or_else(|| non_blank(&fault.name))
            .unwrap_or(UNKNOWN)
            .to_string(),
        Fault::Raw(_) => UNKNOWN.to_string(),
    }
}

/// `error:<Name>` always; `code:<code>` when the fault carries a real code.
pub fn tags(name: &str, fault: &Fault) -> Vec<String> {
    let mut tags = vec![format!("error:{name}")];

    let code = match fault {
        Fault::Structured(fault) => fault.code.clone(),
        Fault::Raw(map) => match map.get("code") {
            Some(Value::String(code)) => Some(code.clone()),
            Some(Value::Integer(code)) if *code != 0 => Some(code.to_string()),
            Some(Value::BigInteger(code)) if *code != 0 => Some(code.to_string()),
            _ => None,
        },
    };

    if let Some(code) = code.as_deref().and_then(non_blank) {
        tags.push(format!("code:{code}"));
    }

    tags
}

fn non_blank(value: &str) -> Option<&str> {
    (!value.trim().is_empty()).then_some(value)
}

fn default_platform() -> String {
    std::env::consts::OS.to_string()
}

fn default_device() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}
