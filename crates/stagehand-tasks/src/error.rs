//! Error types for the tasks crate

use thiserror::Error;

/// Failure to hand work to the host thread
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MainThreadError {
    /// The host dropped its queue, or the job panicked before replying
    #[error("main thread queue is closed")]
    Closed,
}
