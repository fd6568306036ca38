//! # Prometheus Spillway
//!
//! A local task-processing engine with admission control and durable overflow.
//!
//! Messages are executed by a fixed pool of worker threads. When the pool and its
//! in-memory queue are full, incoming work spills to an append-only file on disk instead
//! of being rejected; a background drainer feeds that backlog back into the pool as
//! capacity frees up. Every transition is reported as an [`EngineEvent`](core::EngineEvent).
//!
//! ## Key Features
//!
//! - **Fair admission control**: one permit per in-flight message, `threads + queue_capacity` in total
//! - **Disk priority**: once a backlog exists, new work queues behind it
//! - **Durable overflow**: length-prefixed records, flushed on every append
//! - **At-least-once recovery**: records are acknowledged by byte position after execution
//! - **Event stream**: copy-on-write listener registry for UI or telemetry bridges
//!
//! ## Example
//!
//! ```rust,no_run
//! use prometheus_spillway::config::EngineConfig;
//! use prometheus_spillway::core::{EngineEventType, MessagingEngine};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = MessagingEngine::new(
//!     EngineConfig::new()
//!         .with_worker_threads(2)
//!         .with_queue_capacity(4)
//!         .with_processing_delay_ms(50)
//!         .with_queue_path("tasks.queue"),
//! )?;
//!
//! engine.events().add_listener(|event| {
//!     if event.event_type == EngineEventType::SpilledToDisk {
//!         println!("spilled {}", event.message_id);
//!     }
//! });
//!
//! for i in 0..20 {
//!     engine.submit(format!("message-{i}"))?;
//! }
//! engine.shutdown_gracefully()?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the engine.
pub mod config;
/// Core engine: admission, execution, spillover and events.
pub mod core;
/// Infrastructure adapters for durable storage.
pub mod infra;
/// Run lifecycle around an engine.
pub mod runtime;
/// Fair counting semaphore used for capacity accounting.
pub mod semaphore;
/// Shared utilities.
pub mod util;
