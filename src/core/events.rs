//! Lifecycle events emitted by the engine.
//!
//! Every admission, spill, recovery and completion produces one [`EngineEvent`]. Events
//! are immutable values handed to listeners through the
//! [`EventPublisher`](crate::core::publisher::EventPublisher); the engine never stores them.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::task::Task;
use crate::util::clock::now_ms;

/// Event vocabulary consumed by external listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineEventType {
    /// A message was handed to `submit`.
    Submitted,
    /// A message was written to the durable queue instead of executing.
    SpilledToDisk,
    /// A message was read back from the durable queue for execution.
    RecoveredFromDisk,
    /// A message was dispatched to the execution pool.
    StartProcessing,
    /// The handler finished a message successfully.
    Completed,
    /// The handler returned an error for a message.
    Failed,
}

impl EngineEventType {
    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::SpilledToDisk => "SPILLED_TO_DISK",
            Self::RecoveredFromDisk => "RECOVERED_FROM_DISK",
            Self::StartProcessing => "START_PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EngineEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an executing message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSource {
    /// Admitted directly by `submit`.
    Memory,
    /// Recovered from the durable queue by the drainer.
    Disk,
}

impl EventSource {
    /// Metadata value for the `source` key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Disk => "disk",
        }
    }
}

/// Why a message was spilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpillReason {
    /// Every permit was held.
    NoCapacity,
    /// The durable queue already had a backlog.
    Backlog,
    /// The execution pool refused work despite a held permit.
    Rejected,
}

impl SpillReason {
    /// Metadata value for the `reason` key.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoCapacity => "noCapacity",
            Self::Backlog => "backlog",
            Self::Rejected => "rejected",
        }
    }
}

/// A single lifecycle transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineEvent {
    /// Transition type.
    #[serde(rename = "type")]
    pub event_type: EngineEventType,
    /// Identifier derived from the message payload.
    pub message_id: String,
    /// Raw message payload.
    pub message: String,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    /// Free-form context such as `source` or `reason`.
    pub metadata: BTreeMap<String, String>,
}

impl EngineEvent {
    /// Build an event for `task`, timestamped now.
    #[must_use]
    pub fn new(event_type: EngineEventType, task: &Task) -> Self {
        Self {
            event_type,
            message_id: task.id().to_string(),
            message: task.payload().to_string(),
            timestamp_ms: now_ms(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach a metadata entry.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value.
    #[must_use]
    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Serialize to a JSON string for streaming bridges.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
