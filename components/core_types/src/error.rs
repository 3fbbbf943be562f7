//! Event loop lifecycle errors.
//!
//! Misuse of the promise API itself (double resolve, cancelling a settled
//! state) is reported by `bool` return values and never surfaces here; this
//! module only covers driving the loop at the wrong time.

use thiserror::Error;

/// Errors returned by the event loop's run methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LoopError {
    /// A run method was entered while the loop was already running,
    /// typically from inside a task executing on that same loop.
    #[error("event loop is already running")]
    AlreadyRunning,

    /// A run method was called after the loop had been stopped.
    #[error("event loop has been stopped")]
    Terminated,
}
