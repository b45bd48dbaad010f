use super::level::EventLevel;
use super::value::Metadata;

/// Normalized description of a fault.
#[derive(Debug, Clone)]
pub struct SerializedError {
    pub name: String,
    pub message: String,
    pub stack: Option<String>,
    pub extra: Option<Metadata>,
}

/// Where and in what environment an event happened.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub culprit: String,
    pub extra: Option<Metadata>,
    pub platform: Option<String>,
    pub app: Option<String>,
    pub version: Option<String>,
    pub device: Option<String>,
    pub tags: Vec<String>,
}

/// One captured occurrence, ready to ship.
///
/// Built once by [`EventBuilder`](crate::builder::EventBuilder) and never
/// mutated afterwards: it is moved into the queue, then into a send task,
/// and dropped once that send settles.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_id: String,
    pub title: String,
    pub level: EventLevel,
    pub event: SerializedError,
    pub context: EventContext,
    /// RFC 3339, UTC.
    pub timestamp: String,
}
