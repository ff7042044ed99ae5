//! Errors surfaced by the collector's fallible entry points.
//!
//! Heap corruption is not represented here: it is a broken invariant and
//! panics instead.

use std::fmt;

/// Error type for collector, pool and safepoint operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcError {
    /// The worker pool was finalized before the task could run.
    PoolShutDown,
    /// A task panicked; carries the panic message.
    TaskPanicked(String),
    /// The safepoint quorum was not reached in time.
    SafepointTimeout {
        /// Threads that had arrived when the wait gave up.
        arrived: usize,
        /// Threads the barrier was waiting for.
        expected: usize,
    },
    /// The OS refused to spawn a worker thread.
    WorkerSpawn(String),
}

impl fmt::Display for GcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolShutDown => write!(f, "worker pool has been shut down"),
            Self::TaskPanicked(msg) => write!(f, "gc task panicked: {msg}"),
            Self::SafepointTimeout { arrived, expected } => {
                write!(f, "safepoint timed out with {arrived} of {expected} threads arrived")
            }
            Self::WorkerSpawn(msg) => write!(f, "failed to spawn gc worker: {msg}"),
        }
    }
}

impl std::error::Error for GcError {}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_owned())
}
