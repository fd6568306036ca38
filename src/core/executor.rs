//! Message handler abstraction.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use super::task::Task;
use super::AppResult;

/// Business logic run for each admitted message.
///
/// Handlers run on the execution pool's dedicated worker threads, each of which drives
/// its own single-threaded tokio runtime, so a handler may freely `.await` timers or I/O
/// without touching the caller's runtime.
///
/// An `Err` result is reported as a `FAILED` event. The message is not retried.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use prometheus_spillway::core::{AppResult, MessageHandler, Task};
///
/// #[derive(Clone)]
/// struct Uppercase;
///
/// #[async_trait]
/// impl MessageHandler for Uppercase {
///     async fn handle(&self, task: Task) -> AppResult<()> {
///         println!("{}", task.payload().to_uppercase());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait MessageHandler: Send + Sync + Clone + 'static {
    /// Process one message.
    async fn handle(&self, task: Task) -> AppResult<()>;
}

/// Default handler: logs the message and sleeps for a fixed processing delay.
#[derive(Debug, Clone, Default)]
pub struct DelayHandler {
    delay: Duration,
}

impl DelayHandler {
    /// Handler that simulates `delay` of work per message.
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self { delay }
    }

    /// Configured processing delay.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl MessageHandler for DelayHandler {
    async fn handle(&self, task: Task) -> AppResult<()> {
        info!(message_id = %task.id(), payload = %task.payload(), "processing message");
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_delay_handler_sleeps() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let handler = DelayHandler::new(Duration::from_millis(20));
        let start = Instant::now();
        rt.block_on(handler.handle(Task::new("hello-1"))).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(20));
    }
}
