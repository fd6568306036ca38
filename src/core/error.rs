//! Error types for queue and engine operations.

use thiserror::Error;

use super::worker_pool::PoolError;

/// Errors produced by a durable queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Underlying storage read, write, or flush failed.
    #[error("queue I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The queue file contains a record that cannot be decoded.
    #[error("corrupt queue: {0}")]
    Corrupt(String),
    /// The queue has been closed and its file removed.
    #[error("queue is closed")]
    Closed,
}

/// Errors surfaced to callers of the engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Durable queue failure while spilling or recovering work.
    #[error(transparent)]
    Queue(#[from] QueueError),
    /// The engine is shutting down or already shut down.
    #[error("engine is shut down")]
    ShutDown,
    /// The execution pool could not be built or refused work.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The drainer stopped on a queue failure; the remaining backlog was left on disk.
    #[error("disk drainer stopped: {0}")]
    DrainerStopped(String),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Failure outside the durable queue (thread spawn, runtime construction).
    #[error("engine I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
