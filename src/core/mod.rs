//! Core engine: admission control, execution, spillover and lifecycle events.

pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod processor;
pub mod publisher;
pub mod task;
pub mod worker_pool;

pub use engine::MessagingEngine;
pub use error::{AppResult, EngineError, QueueError};
pub use events::{EngineEvent, EngineEventType, EventSource, SpillReason};
pub use executor::{DelayHandler, MessageHandler};
pub use processor::{EngineStats, WorkerPoolProcessor};
pub use publisher::{EventPublisher, Listener, ListenerId};
pub use task::Task;
pub use worker_pool::{ExecutionPool, Job, PoolError, PoolStats};
