//! Run state machine sequencing engine start, stop and reset.
//!
//! `Idle -> Running -> Stopping -> Stopped -> (reset) -> Idle`. At most one engine is
//! alive at a time; starting while a run is active is refused.

use std::sync::Arc;

use anyhow::{bail, Context};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::core::{AppResult, EngineEvent, MessagingEngine};

/// Lifecycle state of the current run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    /// No run has been started since the last reset.
    Idle,
    /// An engine is accepting work.
    Running,
    /// The engine is draining its backlog.
    Stopping,
    /// The engine has shut down.
    Stopped,
}

/// Status snapshot for external reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatus {
    /// Current state.
    pub state: RunState,
    /// Identifier of the current or last run.
    pub run_id: Option<String>,
}

type SharedListener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

struct Inner {
    state: RunState,
    run_id: Option<String>,
    engine: Option<Arc<MessagingEngine>>,
}

/// Owns at most one [`MessagingEngine`] and its run state.
pub struct RunController {
    inner: Mutex<Inner>,
    listeners: Vec<SharedListener>,
}

impl Default for RunController {
    fn default() -> Self {
        Self::new()
    }
}

impl RunController {
    /// Controller in the `Idle` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Idle,
                run_id: None,
                engine: None,
            }),
            listeners: Vec::new(),
        }
    }

    /// Attach `listener` to every engine this controller starts.
    #[must_use]
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    /// Start a new run with `config`.
    ///
    /// # Errors
    ///
    /// Fails if a run is `Running` or `Stopping`, or if the engine cannot start.
    pub fn start(&self, config: EngineConfig) -> AppResult<Arc<MessagingEngine>> {
        let mut inner = self.inner.lock();
        if matches!(inner.state, RunState::Running | RunState::Stopping) {
            bail!(
                "run already active: {} ({:?})",
                inner.run_id.as_deref().unwrap_or("none"),
                inner.state
            );
        }

        let engine = Arc::new(MessagingEngine::new(config).context("failed to start engine")?);
        for listener in &self.listeners {
            let listener = Arc::clone(listener);
            engine.events().add_listener(move |event| listener(event));
        }

        let run_id = format!("run-{}", uuid::Uuid::new_v4());
        info!(run_id = %run_id, "run started");
        inner.state = RunState::Running;
        inner.run_id = Some(run_id);
        inner.engine = Some(Arc::clone(&engine));
        Ok(engine)
    }

    /// Stop the active run, draining its backlog. A no-op unless `Running`.
    ///
    /// The controller lock is not held while the engine drains, so other threads see
    /// `Stopping` (and can still reach the engine) until the drain finishes. The state
    /// ends in `Stopped` even if shutdown reports an error.
    ///
    /// # Errors
    ///
    /// Returns the engine's shutdown error.
    pub fn stop(&self) -> AppResult<()> {
        let engine = {
            let mut inner = self.inner.lock();
            if inner.state != RunState::Running {
                return Ok(());
            }
            inner.state = RunState::Stopping;
            inner.engine.clone()
        };

        let result = engine.map_or(Ok(()), |engine| engine.shutdown_gracefully());

        let mut inner = self.inner.lock();
        inner.state = RunState::Stopped;
        inner.engine = None;
        info!(run_id = inner.run_id.as_deref().unwrap_or("none"), "run stopped");
        result.context("engine shutdown failed")
    }

    /// Stop any active run and return to `Idle`.
    ///
    /// A stop already in progress on another thread is left to finish; the state stays
    /// `Stopping` rather than jumping to `Idle` under it.
    pub fn reset(&self) {
        if let Err(e) = self.stop() {
            warn!(error = %e, "error while stopping run during reset");
        }
        let mut inner = self.inner.lock();
        if inner.state == RunState::Stopping {
            warn!("stop in progress; reset skipped");
            return;
        }
        inner.state = RunState::Idle;
        inner.run_id = None;
    }

    /// Current state and run id.
    #[must_use]
    pub fn status(&self) -> RunStatus {
        let inner = self.inner.lock();
        RunStatus {
            state: inner.state,
            run_id: inner.run_id.clone(),
        }
    }

    /// Engine of the active run, if any.
    #[must_use]
    pub fn current_engine(&self) -> Option<Arc<MessagingEngine>> {
        self.inner.lock().engine.clone()
    }
}
