//! Fixed-size execution pool backed by dedicated OS threads.
//!
//! The pool is the "execute" half of the processor: it runs whatever futures it is
//! given, in submission order, on `worker_count` threads that each own a
//! single-threaded tokio runtime. Its internal queue is unbounded; the processor's
//! permit pool is what keeps it from growing without limit.
//!
//! Submission is fallible ([`PoolError::PoolShutdown`]) even though the permit gate
//! should make rejection impossible in practice.

mod native;

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

pub use native::ExecutionPool;

/// A unit of work accepted by the pool.
pub type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Errors that can occur when using an `ExecutionPool`.
#[derive(Debug)]
pub enum PoolError {
    /// The pool has been shut down and accepts no more work.
    PoolShutdown,

    /// Configuration validation failed.
    InvalidConfig(String),

    /// Internal error (worker thread spawn failure, runtime construction).
    Internal(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PoolShutdown => write!(f, "pool has been shut down"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Internal(msg) => write!(f, "internal error: {msg}"),
        }
    }
}

impl std::error::Error for PoolError {}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,

    /// Jobs currently running.
    pub active_jobs: u64,

    /// Jobs waiting in the pool's queue.
    pub queued_jobs: u64,

    /// Jobs that ran to completion (including ones that panicked).
    pub completed_jobs: u64,
}

/// Internal counters for pool statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    pub active_jobs: AtomicU64,
    pub queued_jobs: AtomicU64,
    pub completed_jobs: AtomicU64,
}

impl PoolCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            completed_jobs: self.completed_jobs.load(Ordering::Relaxed),
        }
    }
}
