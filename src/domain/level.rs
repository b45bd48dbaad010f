use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity of a captured event, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventLevel {
    Debug,
    Info,
    Warning,
    #[default]
    Error,
    Fatal,
}

impl EventLevel {
    pub const ALL: [EventLevel; 5] = [
        EventLevel::Debug,
        EventLevel::Info,
        EventLevel::Warning,
        EventLevel::Error,
        EventLevel::Fatal,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventLevel::Debug => "DEBUG",
            EventLevel::Info => "INFO",
            EventLevel::Warning => "WARNING",
            EventLevel::Error => "ERROR",
            EventLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event level: {0}")]
pub struct UnknownLevel(pub String);

impl FromStr for EventLevel {
    type Err = UnknownLevel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(EventLevel::Debug),
            "INFO" => Ok(EventLevel::Info),
            "WARNING" | "WARN" => Ok(EventLevel::Warning),
            "ERROR" => Ok(EventLevel::Error),
            "FATAL" => Ok(EventLevel::Fatal),
            _ => Err(UnknownLevel(s.to_string())),
        }
    }
}
