//! Typed error enums for the publishing pipeline and timer manager.
//!
//! Operational glue (config loading, storage wiring) uses `anyhow`; public
//! module boundaries use these typed enums instead, so callers can match
//! on them.

use uuid::Uuid;

/// Errors returned by [`crate::queue::PriorityQueue::submit`] and
/// [`crate::engine::PublishingEngine::submit`].
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    /// The chosen priority tier's channel is at capacity.
    #[error("queue full for priority {0:?}")]
    QueueFull(crate::job::JobPriority),

    /// The engine has stopped accepting submits (shutdown in progress, or the
    /// dead-letter store was unavailable at startup).
    #[error("engine is not accepting submits: {0}")]
    NotAccepting(&'static str),
}

/// Errors surfaced by [`crate::engine::PublishingEngine::stop`] and
/// [`crate::timers::manager::GroupTimerManager::shutdown`].
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    /// In-flight work did not drain within the requested grace period.
    #[error("shutdown exceeded grace period of {0:?}")]
    Cancelled(std::time::Duration),
}

/// Errors returned by [`crate::dlq::store::DeadLetterStore`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum DlqError {
    /// The backing store could not be reached or returned an error.
    #[error("dead-letter store unavailable: {0}")]
    StorageUnavailable(String),

    /// No entry exists with the given id.
    #[error("dead-letter entry {0} not found")]
    NotFound(Uuid),

    /// The store's indexed schema rejected the write (e.g. unique id clash).
    #[error("dead-letter write rejected: {0}")]
    Rejected(String),
}

/// Errors returned by [`crate::timers::storage::TimerStorage`] implementations.
#[derive(Debug, thiserror::Error)]
pub enum TimerStorageError {
    /// The backing KV store could not be reached.
    #[error("timer storage unavailable: {0}")]
    Unavailable(String),

    /// A distributed lock could not be acquired (already held).
    #[error("lock for group {0} is held by another instance")]
    LockHeld(String),
}

/// Errors returned synchronously by [`crate::timers::manager::GroupTimerManager`]
/// timer-admin operations. Expiration-time errors are logged, not returned.
#[derive(Debug, thiserror::Error)]
pub enum TimerError {
    /// `duration` was zero or otherwise out of range for the given kind.
    #[error("invalid duration for timer kind {0:?}: {1:?}")]
    InvalidDuration(crate::timers::model::TimerKind, std::time::Duration),

    /// The timer kind is not one of the three recognized kinds.
    #[error("unknown timer kind")]
    UnknownTimerKind,

    /// The manager's concurrent timer ceiling (`MaxConcurrentTimers`) was hit.
    #[error("too many concurrent timers (limit {0})")]
    TooManyTimers(usize),

    /// The backing timer store rejected the operation.
    #[error(transparent)]
    Storage(#[from] TimerStorageError),
}
