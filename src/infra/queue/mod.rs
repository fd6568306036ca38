//! Durable queue backends.
//!
//! A durable queue is an append-only FIFO with position-based acknowledgment: `poll`
//! hands out a [`DiskRecord`] whose `next_position` is later passed to `ack` once the
//! record's work is done.

pub mod file;

pub use file::FileDiskQueue;

use crate::core::QueueError;

/// One stored, not yet acknowledged message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    /// Byte offset immediately after this record; the acknowledgment token.
    pub next_position: u64,
    /// Stored payload.
    pub message: String,
}

/// Append-only FIFO store with explicit consumer acknowledgment.
///
/// Implementations must be safe for one writer and one reader operating concurrently.
pub trait DurableQueue: Send + Sync {
    /// Durably append `message` to the back of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the write or flush fails.
    fn append(&self, message: &str) -> Result<(), QueueError>;

    /// Read the next unread record, or `None` at the end of the queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Corrupt`] for a record that cannot be decoded.
    fn poll(&self) -> Result<Option<DiskRecord>, QueueError>;

    /// Advance the commit position to `next_position`; stale positions are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Closed`] if the queue has been closed.
    fn ack(&self, next_position: u64) -> Result<(), QueueError>;

    /// `true` when every stored record has been read.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the backing store cannot be inspected.
    fn is_empty(&self) -> Result<bool, QueueError>;

    /// Release the backing store and delete it.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::Io`] if the store cannot be removed.
    fn close(&self) -> Result<(), QueueError>;
}
