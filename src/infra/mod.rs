//! Infrastructure adapters for durable storage.

pub mod queue;

pub use queue::{DiskRecord, DurableQueue, FileDiskQueue};
