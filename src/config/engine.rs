//! Engine configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prefix for environment variables read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "SPILLWAY_";

/// Worker pool, spillover and timing configuration for one engine.
///
/// Capacity is `worker_threads + queue_capacity`: that many messages may be in flight
/// (executing or waiting in memory) before new work spills to disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of execution threads.
    pub worker_threads: usize,
    /// Messages allowed to wait in memory beyond those executing.
    pub queue_capacity: usize,
    /// Simulated work per message for the default handler, in milliseconds.
    pub processing_delay_ms: u64,
    /// Durable queue file.
    pub queue_path: PathBuf,
    /// Drainer bounded wait, used both for idle waits and permit acquisition.
    pub drain_poll_interval_ms: u64,
    /// Fixed pause applied after the execution pool rejects work.
    pub rejection_backoff_ms: u64,
    /// Sleep between backlog checks while shutting down.
    pub shutdown_poll_interval_ms: u64,
    /// Time allowed for queued work to finish before the pool is torn down forcefully.
    pub termination_timeout_ms: u64,
    /// Worker thread stack size in bytes.
    pub thread_stack_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            queue_capacity: 10,
            processing_delay_ms: 0,
            queue_path: PathBuf::from("tasks.queue"),
            drain_poll_interval_ms: 200,
            rejection_backoff_ms: 100,
            shutdown_poll_interval_ms: 100,
            termination_timeout_ms: 500_000,
            thread_stack_size: 2 * 1024 * 1024,
        }
    }
}

impl EngineConfig {
    /// Defaults, see [`Default`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of execution threads.
    #[must_use]
    pub const fn with_worker_threads(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Set the in-memory queue capacity.
    #[must_use]
    pub const fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Set the default handler's processing delay.
    #[must_use]
    pub const fn with_processing_delay_ms(mut self, processing_delay_ms: u64) -> Self {
        self.processing_delay_ms = processing_delay_ms;
        self
    }

    /// Set the durable queue file location.
    #[must_use]
    pub fn with_queue_path(mut self, queue_path: impl Into<PathBuf>) -> Self {
        self.queue_path = queue_path.into();
        self
    }

    /// Set the drainer poll interval.
    #[must_use]
    pub const fn with_drain_poll_interval_ms(mut self, drain_poll_interval_ms: u64) -> Self {
        self.drain_poll_interval_ms = drain_poll_interval_ms;
        self
    }

    /// Set the pause applied after a pool rejection.
    #[must_use]
    pub const fn with_rejection_backoff_ms(mut self, rejection_backoff_ms: u64) -> Self {
        self.rejection_backoff_ms = rejection_backoff_ms;
        self
    }

    /// Set the graceful termination timeout.
    #[must_use]
    pub const fn with_termination_timeout_ms(mut self, termination_timeout_ms: u64) -> Self {
        self.termination_timeout_ms = termination_timeout_ms;
        self
    }

    /// Total permits: `worker_threads + queue_capacity`.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.worker_threads + self.queue_capacity
    }

    /// Processing delay as a `Duration`.
    #[must_use]
    pub const fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }

    /// Drainer poll interval as a `Duration`.
    #[must_use]
    pub const fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }

    /// Rejection backoff as a `Duration`.
    #[must_use]
    pub const fn rejection_backoff(&self) -> Duration {
        Duration::from_millis(self.rejection_backoff_ms)
    }

    /// Shutdown poll interval as a `Duration`.
    #[must_use]
    pub const fn shutdown_poll_interval(&self) -> Duration {
        Duration::from_millis(self.shutdown_poll_interval_ms)
    }

    /// Termination timeout as a `Duration`.
    #[must_use]
    pub const fn termination_timeout(&self) -> Duration {
        Duration::from_millis(self.termination_timeout_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".into());
        }
        if self.drain_poll_interval_ms == 0 {
            return Err("drain_poll_interval_ms must be greater than 0".into());
        }
        if self.shutdown_poll_interval_ms == 0 {
            return Err("shutdown_poll_interval_ms must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        if self.queue_path.as_os_str().is_empty() {
            return Err("queue_path must not be empty".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate. Missing fields take defaults.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `SPILLWAY_*` environment variables over the defaults.
    ///
    /// A `.env` file in the working directory is loaded first if present. Recognized
    /// variables: `SPILLWAY_WORKER_THREADS`, `SPILLWAY_QUEUE_CAPACITY`,
    /// `SPILLWAY_PROCESSING_DELAY_MS`, `SPILLWAY_QUEUE_PATH`,
    /// `SPILLWAY_DRAIN_POLL_INTERVAL_MS`, `SPILLWAY_REJECTION_BACKOFF_MS`,
    /// `SPILLWAY_SHUTDOWN_POLL_INTERVAL_MS`, `SPILLWAY_TERMINATION_TIMEOUT_MS`,
    /// `SPILLWAY_THREAD_STACK_SIZE`.
    ///
    /// # Errors
    ///
    /// Returns a message naming the variable that failed to parse, or a validation message.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup (keys carry the `SPILLWAY_` prefix).
    ///
    /// # Errors
    ///
    /// Same as [`EngineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(v) = parse_var(&get, "WORKER_THREADS")? {
            cfg.worker_threads = v;
        }
        if let Some(v) = parse_var(&get, "QUEUE_CAPACITY")? {
            cfg.queue_capacity = v;
        }
        if let Some(v) = parse_var(&get, "PROCESSING_DELAY_MS")? {
            cfg.processing_delay_ms = v;
        }
        if let Some(v) = get("QUEUE_PATH") {
            cfg.queue_path = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&get, "DRAIN_POLL_INTERVAL_MS")? {
            cfg.drain_poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&get, "REJECTION_BACKOFF_MS")? {
            cfg.rejection_backoff_ms = v;
        }
        if let Some(v) = parse_var(&get, "SHUTDOWN_POLL_INTERVAL_MS")? {
            cfg.shutdown_poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&get, "TERMINATION_TIMEOUT_MS")? {
            cfg.termination_timeout_ms = v;
        }
        if let Some(v) = parse_var(&get, "THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

fn parse_var<T, G>(get: &G, name: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| format!("{ENV_PREFIX}{name}: {e}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_is_threads_plus_queue() {
        let cfg = EngineConfig::new().with_worker_threads(3).with_queue_capacity(7);
        assert_eq!(cfg.capacity(), 10);
    }

    #[test]
    fn test_lookup_overrides_defaults() {
        let cfg = EngineConfig::from_lookup(|key| match key {
            "SPILLWAY_WORKER_THREADS" => Some("2".into()),
            "SPILLWAY_QUEUE_PATH" => Some("/tmp/spill.queue".into()),
            _ => None,
        })
        .unwrap();
        assert_eq!(cfg.worker_threads, 2);
        assert_eq!(cfg.queue_path, PathBuf::from("/tmp/spill.queue"));
        assert_eq!(cfg.queue_capacity, 10);
    }

    #[test]
    fn test_lookup_reports_bad_value() {
        let err = EngineConfig::from_lookup(|key| {
            (key == "SPILLWAY_QUEUE_CAPACITY").then(|| "lots".to_string())
        })
        .unwrap_err();
        assert!(err.starts_with("SPILLWAY_QUEUE_CAPACITY"));
    }
}
