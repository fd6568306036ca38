//! Engine facade: one processor and one event publisher for the lifetime of a run.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::core::error::EngineError;
use crate::core::executor::{DelayHandler, MessageHandler};
use crate::core::processor::{EngineStats, WorkerPoolProcessor};
use crate::core::publisher::EventPublisher;
use crate::infra::queue::DurableQueue;

/// Composition root binding a [`WorkerPoolProcessor`] to its [`EventPublisher`].
pub struct MessagingEngine<H: MessageHandler = DelayHandler> {
    processor: WorkerPoolProcessor<H>,
    events: Arc<EventPublisher>,
}

impl<H: MessageHandler> std::fmt::Debug for MessagingEngine<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessagingEngine")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

impl MessagingEngine<DelayHandler> {
    /// Start an engine whose handler sleeps `config.processing_delay_ms` per message.
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolProcessor::new`].
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        let handler = DelayHandler::new(config.processing_delay());
        Self::with_handler(config, handler)
    }
}

impl<H: MessageHandler> MessagingEngine<H> {
    /// Start an engine with a custom handler, spilling to `config.queue_path`.
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolProcessor::new`].
    pub fn with_handler(config: EngineConfig, handler: H) -> Result<Self, EngineError> {
        let events = Arc::new(EventPublisher::new());
        let processor = WorkerPoolProcessor::new(config, handler, Arc::clone(&events))?;
        Ok(Self { processor, events })
    }

    /// Start an engine with a custom handler and durable queue.
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolProcessor::with_queue`].
    pub fn with_queue(
        config: EngineConfig,
        handler: H,
        queue: Arc<dyn DurableQueue>,
    ) -> Result<Self, EngineError> {
        let events = Arc::new(EventPublisher::new());
        let processor = WorkerPoolProcessor::with_queue(config, handler, Arc::clone(&events), queue)?;
        Ok(Self { processor, events })
    }

    /// Submit a message. See [`WorkerPoolProcessor::submit`].
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolProcessor::submit`].
    pub fn submit(&self, message: impl Into<String>) -> Result<(), EngineError> {
        self.processor.submit(message)
    }

    /// Listener registration handle.
    #[must_use]
    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.events
    }

    /// Activity counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        self.processor.stats()
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        self.processor.config()
    }

    /// Drain the backlog and stop. See [`WorkerPoolProcessor::shutdown_gracefully`].
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolProcessor::shutdown_gracefully`].
    pub fn shutdown_gracefully(&self) -> Result<(), EngineError> {
        self.processor.shutdown_gracefully()
    }
}
