use crate::client::hooks::WarningLayer;
use crate::config::LogLevel;
use std::sync::OnceLock;
use thiserror::Error;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Target of the SDK's internal diagnostic sink (dropped events, swallowed
/// capture failures).
pub const DIAGNOSTICS_TARGET: &str = "error_tracker::diagnostics";

const QUIET_TARGETS: &[&str] = &["hyper", "reqwest", "h2"];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid log filter '{filter}': {reason}")]
    Filter { filter: String, reason: String },
    #[error("Failed to set global tracing subscriber: {0}")]
    Install(String),
}

/// Default level first, then the HTTP stack quieted to `warn`.
pub fn filter_directives(level: LogLevel) -> String {
    let mut parts = Vec::with_capacity(QUIET_TARGETS.len() + 1);
    parts.push(level.as_str().to_string());
    parts.extend(QUIET_TARGETS.iter().map(|target| format!("{target}=warn")));
    parts.join(",")
}

/// Installs a global subscriber once per process; `RUST_LOG` wins over `level`.
///
/// Also attaches [`WarningLayer`] so host `WARN` events reach started clients.
pub fn init_logging(level: LogLevel) -> Result<(), LoggingError> {
    static INIT: OnceLock<Result<(), LoggingError>> = OnceLock::new();

    INIT.get_or_init(|| {
        let filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => {
                let directives = filter_directives(level);
                EnvFilter::try_new(&directives).map_err(|e| LoggingError::Filter {
                    filter: directives.clone(),
                    reason: e.to_string(),
                })?
            }
        };

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_level(true)
                    .compact(),
            )
            .with(WarningLayer::new());

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|e| LoggingError::Install(e.to_string()))
    })
    .clone()
}
