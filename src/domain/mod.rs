//! Domain layer for error-tracker.
//!
//! Contains the canonical types shared across all modules:
//! - `Event`: The pipeline's core data type
//! - `EventLevel`: Event severity (Debug/Info/Warning/Error/Fatal)
//! - `Fault`: What callers report, structured or as a raw map
//! - `Value`: Dynamic, possibly self-referential metadata

pub mod event;
pub mod fault;
pub mod level;
pub mod value;

pub use event::{Event, EventContext, SerializedError};
pub use fault::{Fault, StackFrame, StructuredFault, parse_backtrace};
pub use level::{EventLevel, UnknownLevel};
pub use value::{Metadata, Shared, Value, metadata};
