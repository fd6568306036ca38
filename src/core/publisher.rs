//! Fan-out registry for engine lifecycle events.
//!
//! Listeners are held in a copy-on-write list: `publish` clones an `Arc` to the current
//! list under a brief read lock and iterates that snapshot with no lock held. Adding or
//! removing a listener swaps in a new list, so registration changes never disturb an
//! in-flight publish and never block on a slow listener.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::core::events::EngineEvent;

/// Callback invoked for every published event.
pub type Listener = Arc<dyn Fn(&EngineEvent) + Send + Sync>;

/// Handle returned by [`EventPublisher::add_listener`], used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Multi-listener broadcast point.
#[derive(Default)]
pub struct EventPublisher {
    listeners: RwLock<Arc<Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl EventPublisher {
    /// Create a publisher with no listeners.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. It sees events published after this call returns.
    ///
    /// Listeners run synchronously on the publishing thread (a submitter, a worker, or
    /// the drainer). They may submit new messages but must not shut the engine down.
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&EngineEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut guard = self.listeners.write();
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push((id, Arc::new(listener) as Listener));
        *guard = Arc::new(next);
        id
    }

    /// Unregister a listener. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut guard = self.listeners.write();
        if !guard.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        let next: Vec<_> = guard
            .iter()
            .filter(|(existing, _)| *existing != id)
            .cloned()
            .collect();
        *guard = Arc::new(next);
        true
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    /// Invoke every registered listener, in registration order, on the calling thread.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners still run.
    pub fn publish(&self, event: &EngineEvent) {
        let snapshot = Arc::clone(&self.listeners.read());
        for (id, listener) in snapshot.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!(
                    listener = id.0,
                    event_type = %event.event_type,
                    message_id = %event.message_id,
                    "event listener panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPublisher")
            .field("listeners", &self.listener_count())
            .finish()
    }
}
