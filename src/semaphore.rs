//! Fair counting semaphore
//!
//! Capacity accounting for the worker pool: a fixed number of permits, handed out in
//! strict arrival order. Blocking acquirers join a FIFO wait list and only the head of
//! that list may take a released permit. A non-blocking [`FairSemaphore::try_acquire`]
//! never barges past queued waiters.
//!
//! Permits are RAII guards: dropping a [`Permit`] returns it to the pool, so a permit is
//! released on every exit path of the code holding it, including unwinding.
//!
//! # Examples
//!
//! ```
//! use prometheus_spillway::semaphore::FairSemaphore;
//! use std::sync::Arc;
//!
//! let permits = Arc::new(FairSemaphore::new(2));
//! let a = permits.try_acquire().unwrap();
//! let _b = permits.try_acquire().unwrap();
//! assert!(permits.try_acquire().is_none());
//!
//! drop(a);
//! assert_eq!(permits.available(), 1);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug)]
struct State {
    available: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

/// A fair counting semaphore.
#[derive(Debug)]
pub struct FairSemaphore {
    state: Mutex<State>,
    released: Condvar,
    capacity: usize,
}

impl FairSemaphore {
    /// Create a semaphore holding `capacity` permits.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(State {
                available: capacity,
                waiters: VecDeque::new(),
                next_ticket: 0,
            }),
            released: Condvar::new(),
            capacity,
        }
    }

    /// Total number of permits.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Take a permit if one is free and nobody is queued for one.
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<Permit> {
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.available > 0 {
            state.available -= 1;
            return Some(Permit::new(Arc::clone(self)));
        }
        None
    }

    /// Wait up to `timeout` for a permit, queuing behind earlier waiters.
    ///
    /// Returns `None` if the timeout elapses first.
    #[must_use]
    pub fn try_acquire_for(self: &Arc<Self>, timeout: Duration) -> Option<Permit> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        if state.waiters.is_empty() && state.available > 0 {
            state.available -= 1;
            return Some(Permit::new(Arc::clone(self)));
        }

        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.waiters.push_back(ticket);

        loop {
            if state.waiters.front() == Some(&ticket) && state.available > 0 {
                state.available -= 1;
                state.waiters.pop_front();
                // The new head may be able to proceed as well.
                self.released.notify_all();
                return Some(Permit::new(Arc::clone(self)));
            }
            if self.released.wait_until(&mut state, deadline).timed_out() {
                if state.waiters.front() == Some(&ticket) && state.available > 0 {
                    continue;
                }
                state.waiters.retain(|t| *t != ticket);
                self.released.notify_all();
                return None;
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        state.available += 1;
        debug_assert!(state.available <= self.capacity);
        self.released.notify_all();
    }
}

/// One unit of capacity, returned to its semaphore on drop.
#[derive(Debug)]
#[must_use = "dropping a permit releases it immediately"]
pub struct Permit {
    semaphore: Arc<FairSemaphore>,
}

impl Permit {
    const fn new(semaphore: Arc<FairSemaphore>) -> Self {
        Self { semaphore }
    }

    /// Release the permit now. Equivalent to dropping it.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}
