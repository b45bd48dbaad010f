#![deny(rust_2024_compatibility)]
// Specific pedantic lints enforced (not blanket allow):
#![deny(
    clippy::explicit_iter_loop,
    clippy::manual_let_else,
    clippy::semicolon_if_nothing_returned,
    clippy::inconsistent_struct_constructor
)]
// Noisy pedantic lints suppressed with justification:
#![allow(
    clippy::cast_lossless,            // Infallible casts are clear enough with `as`
    clippy::cast_possible_truncation, // Safe within realistic value bounds (durations, sizes)
    clippy::cast_sign_loss,           // Safe where values are known non-negative
    clippy::missing_errors_doc,       // Internal API
    clippy::missing_panics_doc,       // Internal API
    clippy::module_name_repetitions,  // e.g. TransportError in transport module
    clippy::must_use_candidate,       // Annotated selectively on critical APIs
    clippy::doc_markdown              // Internal API
)]

pub mod buffer;
pub mod builder;
pub mod client;
pub mod config;
pub mod domain;
pub mod logging;
pub mod registry;
pub mod sender;

// Re-export main types for easy access
pub use buffer::{DispatchError, DispatchStats};
pub use builder::{BuildError, EventBuilder, safe_stringify};
pub use client::hooks::WarningLayer;
pub use client::{Client, ClientState};
pub use config::{ClientConfig, ConfigError, LogLevel};
pub use domain::{Event, EventLevel, Fault, Metadata, StructuredFault, Value, metadata};
pub use logging::init_logging;
pub use registry::{Registry, RegistryError};
pub use sender::{Delivery, EventSink, RetryPolicy, Transport, TransportError};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// User-Agent sent with every webhook request.
pub const USER_AGENT: &str = concat!("error-tracker-rs/", env!("CARGO_PKG_VERSION"));
