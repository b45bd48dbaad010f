pub mod dispatcher;
pub mod queue;

pub use dispatcher::{BatchOutcome, DispatchError, DispatchStats, Dispatcher};
pub use queue::EventQueue;
