//! Admission control, disk spillover and background recovery.
//!
//! # Admission
//!
//! Capacity is a [`FairSemaphore`] sized `worker_threads + queue_capacity`. A message
//! admitted to the execution pool holds one [`Permit`] from the moment it is dispatched
//! until its handler returns, so the pool's own queue can never hold more than
//! `queue_capacity` waiting messages.
//!
//! `submit` follows three rules, in order:
//!
//! 1. If the durable queue holds a backlog, the message joins the back of it
//!    (disk priority), even if a permit happens to be free.
//! 2. If no permit is free, the message spills to disk.
//! 3. Otherwise it is dispatched to the pool.
//!
//! Two producers racing the backlog check may interleave a memory admission with a disk
//! append; ordering across producers is best-effort.
//!
//! # Recovery
//!
//! A dedicated `disk-drainer` thread waits (level-triggered, with a bounded fallback
//! timer) for backlog and capacity, then moves records from disk back into the pool.
//! A record is acknowledged once its handler returns. The commit position is a single
//! watermark, so out-of-order completions may acknowledge past a record that is still
//! running; a crash in that window redelivers rather than loses work.
//!
//! Any queue failure while the drainer reads is fatal to the drainer. The processor
//! keeps accepting memory-path work but the backlog is no longer recovered.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::anyhow;
use futures::FutureExt;
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::error::{EngineError, QueueError};
use crate::core::events::{EngineEvent, EngineEventType, EventSource, SpillReason};
use crate::core::executor::MessageHandler;
use crate::core::publisher::EventPublisher;
use crate::core::task::Task;
use crate::core::worker_pool::{ExecutionPool, Job, PoolStats};
use crate::infra::queue::{DiskRecord, DurableQueue, FileDiskQueue};
use crate::semaphore::{FairSemaphore, Permit};

/// Snapshot of processor activity.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Messages handed to `submit`.
    pub submitted: u64,
    /// Messages written to the durable queue (including re-appends after rejection).
    pub spilled: u64,
    /// Records read back from the durable queue.
    pub recovered: u64,
    /// Messages dispatched to the execution pool.
    pub started: u64,
    /// Messages whose handler succeeded.
    pub completed: u64,
    /// Messages whose handler returned an error.
    pub failed: u64,
    /// Permits currently held (executing plus waiting in memory).
    pub in_flight: usize,
    /// Total permits.
    pub capacity: usize,
    /// `false` once the drainer has stopped.
    pub draining: bool,
    /// Execution pool statistics.
    pub pool: PoolStats,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    spilled: AtomicU64,
    recovered: AtomicU64,
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

struct Shared<H> {
    config: EngineConfig,
    handler: H,
    pool: ExecutionPool,
    permits: Arc<FairSemaphore>,
    queue: Arc<dyn DurableQueue>,
    events: Arc<EventPublisher>,
    /// `true` while `submit` is allowed. Submitters hold the read lock for the whole
    /// admission so shutdown can wait them out.
    accepting: RwLock<bool>,
    /// Drainer keeps looping while set.
    running: AtomicBool,
    /// Set when the drainer exits on a queue failure.
    drain_failure: Mutex<Option<String>>,
    wake_lock: Mutex<()>,
    wake: Condvar,
    counters: Counters,
}

/// Worker pool with fair admission control and durable spillover.
pub struct WorkerPoolProcessor<H: MessageHandler> {
    shared: Arc<Shared<H>>,
    drainer: Mutex<Option<JoinHandle<()>>>,
}

impl<H: MessageHandler> WorkerPoolProcessor<H> {
    /// Start a processor spilling to the file at `config.queue_path`.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration, if the queue file cannot be opened, or if a
    /// thread cannot be spawned.
    pub fn new(
        config: EngineConfig,
        handler: H,
        events: Arc<EventPublisher>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let queue = Arc::new(FileDiskQueue::open(&config.queue_path)?);
        Self::with_queue(config, handler, events, queue)
    }

    /// Start a processor spilling to a caller-supplied durable queue.
    ///
    /// # Errors
    ///
    /// Fails on invalid configuration or if a thread cannot be spawned.
    pub fn with_queue(
        config: EngineConfig,
        handler: H,
        events: Arc<EventPublisher>,
        queue: Arc<dyn DurableQueue>,
    ) -> Result<Self, EngineError> {
        config.validate().map_err(EngineError::InvalidConfig)?;
        let pool = ExecutionPool::new(config.worker_threads, config.thread_stack_size)?;
        let permits = Arc::new(FairSemaphore::new(config.capacity()));

        let shared = Arc::new(Shared {
            config,
            handler,
            pool,
            permits,
            queue,
            events,
            accepting: RwLock::new(true),
            running: AtomicBool::new(true),
            drain_failure: Mutex::new(None),
            wake_lock: Mutex::new(()),
            wake: Condvar::new(),
            counters: Counters::default(),
        });

        let drainer = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("disk-drainer".into())
                .spawn(move || drain_loop(&shared))
        };
        let drainer = match drainer {
            Ok(handle) => handle,
            Err(e) => {
                shared.pool.shutdown(shared.config.termination_timeout());
                return Err(e.into());
            }
        };

        info!(
            worker_threads = shared.config.worker_threads,
            queue_capacity = shared.config.queue_capacity,
            capacity = shared.config.capacity(),
            queue_path = %shared.config.queue_path.display(),
            "worker pool processor started"
        );

        Ok(Self {
            shared,
            drainer: Mutex::new(Some(drainer)),
        })
    }

    /// Submit a message for execution, spilling it to disk if the pool is saturated or
    /// a backlog already exists.
    ///
    /// Blocks only for the fixed backoff after a pool rejection.
    ///
    /// Listeners run inside this call, so a listener may itself call `submit`. A
    /// listener must not call [`Self::shutdown_gracefully`]: shutdown waits for every
    /// in-progress `submit`, including the one that invoked the listener.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ShutDown`] once shutdown has begun and
    /// [`EngineError::Queue`] if a spill to disk fails.
    pub fn submit(&self, message: impl Into<String>) -> Result<(), EngineError> {
        // Recursive so a nested submit from a listener is not parked behind a waiting
        // shutdown that is itself waiting on the outer submit.
        let accepting = self.shared.accepting.read_recursive();
        if !*accepting {
            return Err(EngineError::ShutDown);
        }

        let task = Task::new(message);
        self.shared.counters.submitted.fetch_add(1, Ordering::Relaxed);
        self.shared.publish(EngineEvent::new(EngineEventType::Submitted, &task));

        if !self.shared.queue.is_empty()? {
            return self.shared.spill(&task, SpillReason::Backlog);
        }

        let Some(permit) = self.shared.permits.try_acquire() else {
            return self.shared.spill(&task, SpillReason::NoCapacity);
        };

        self.shared.dispatch(task, permit, EventSource::Memory, None)
    }

    /// Wait for the disk backlog to drain, then stop the drainer, finish queued work,
    /// and delete the queue file.
    ///
    /// New submissions are refused from the moment this is called. If the drainer has
    /// already stopped on a queue failure the backlog cannot drain: the pool is still shut
    /// down but the queue file is kept and [`EngineError::DrainerStopped`] is returned.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Queue`] if the queue cannot be inspected or removed.
    pub fn shutdown_gracefully(&self) -> Result<(), EngineError> {
        {
            let mut accepting = self.shared.accepting.write();
            if !*accepting && self.drainer.lock().is_none() {
                return Ok(());
            }
            *accepting = false;
        }
        info!("graceful shutdown requested; waiting for disk backlog to drain");

        let mut failure = None;
        while !self.shared.queue.is_empty()? {
            if let Some(reason) = self.shared.drain_failure.lock().clone() {
                failure = Some(reason);
                break;
            }
            thread::sleep(self.shared.config.shutdown_poll_interval());
        }

        self.shared.running.store(false, Ordering::Release);
        self.shared.signal();
        if let Some(drainer) = self.drainer.lock().take() {
            if drainer.join().is_err() {
                warn!("disk drainer panicked");
            }
        }

        if !self.shared.pool.shutdown(self.shared.config.termination_timeout()) {
            warn!("execution pool did not terminate in time; remaining work discarded");
        }

        if let Some(reason) = failure {
            error!(reason = %reason, "shut down with undrained backlog; queue file kept");
            return Err(EngineError::DrainerStopped(reason));
        }

        self.shared.queue.close()?;
        info!("worker pool processor shut down");
        Ok(())
    }

    /// Event publisher this processor reports to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventPublisher> {
        &self.shared.events
    }

    /// Configuration in effect.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// `true` until shutdown has begun.
    #[must_use]
    pub fn is_accepting(&self) -> bool {
        *self.shared.accepting.read()
    }

    /// Current activity counters.
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        let c = &self.shared.counters;
        EngineStats {
            submitted: c.submitted.load(Ordering::Relaxed),
            spilled: c.spilled.load(Ordering::Relaxed),
            recovered: c.recovered.load(Ordering::Relaxed),
            started: c.started.load(Ordering::Relaxed),
            completed: c.completed.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            in_flight: self.shared.permits.in_use(),
            capacity: self.shared.permits.capacity(),
            draining: self.shared.running.load(Ordering::Acquire)
                && self.shared.drain_failure.lock().is_none(),
            pool: self.shared.pool.stats(),
        }
    }
}

impl<H: MessageHandler> Drop for WorkerPoolProcessor<H> {
    fn drop(&mut self) {
        // Stop the drainer without waiting; shutdown_gracefully() is the clean path.
        if self.drainer.lock().is_some() {
            self.shared.running.store(false, Ordering::Release);
            self.shared.signal();
            debug!("WorkerPoolProcessor dropped without graceful shutdown - queue file kept");
        }
    }
}

impl<H: MessageHandler> Shared<H> {
    fn publish(&self, event: EngineEvent) {
        self.events.publish(&event);
    }

    fn signal(&self) {
        let _guard = self.wake_lock.lock();
        self.wake.notify_all();
    }

    fn await_signal(&self) {
        let mut guard = self.wake_lock.lock();
        let _ = self
            .wake
            .wait_for(&mut guard, self.config.drain_poll_interval());
    }

    /// Append `task` to the durable queue and wake the drainer.
    fn spill(&self, task: &Task, reason: SpillReason) -> Result<(), EngineError> {
        self.counters.spilled.fetch_add(1, Ordering::Relaxed);
        self.publish(
            EngineEvent::new(EngineEventType::SpilledToDisk, task).with_meta("reason", reason.as_str()),
        );
        debug!(message_id = %task.id(), reason = reason.as_str(), "spilling message to disk");
        self.queue.append(task.payload())?;
        self.signal();
        Ok(())
    }

    /// Hand `task` to the pool under `permit`. On rejection the permit is released, the
    /// message goes to the back of the durable queue, and the caller pauses briefly.
    fn dispatch(
        self: &Arc<Self>,
        task: Task,
        permit: Permit,
        source: EventSource,
        ack_position: Option<u64>,
    ) -> Result<(), EngineError> {
        self.counters.started.fetch_add(1, Ordering::Relaxed);
        self.publish(
            EngineEvent::new(EngineEventType::StartProcessing, &task).with_meta("source", source.as_str()),
        );

        let job = self.job(task.clone(), permit, source, ack_position);
        if let Err(e) = self.pool.execute(job) {
            // The rejected job, and the permit inside it, is already dropped.
            warn!(message_id = %task.id(), error = %e, "execution pool rejected message");
            let spilled = self.spill(&task, SpillReason::Rejected);
            thread::sleep(self.config.rejection_backoff());
            spilled?;
        }
        Ok(())
    }

    fn job(self: &Arc<Self>, task: Task, permit: Permit, source: EventSource, ack_position: Option<u64>) -> Job {
        let shared = Arc::clone(self);
        Box::pin(async move {
            let event_task = task.clone();
            // A panicking handler still gets its ack, release and terminal event.
            let result = AssertUnwindSafe(shared.handler.handle(task))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(anyhow!("handler panicked")));

            if let Some(position) = ack_position {
                if let Err(e) = shared.queue.ack(position) {
                    error!(message_id = %event_task.id(), position, error = %e, "failed to ack disk record");
                }
            }
            drop(permit);
            shared.signal();

            match result {
                Ok(()) => {
                    shared.counters.completed.fetch_add(1, Ordering::Relaxed);
                    shared.publish(
                        EngineEvent::new(EngineEventType::Completed, &event_task)
                            .with_meta("source", source.as_str()),
                    );
                }
                Err(e) => {
                    shared.counters.failed.fetch_add(1, Ordering::Relaxed);
                    warn!(message_id = %event_task.id(), error = %e, "handler failed");
                    shared.publish(
                        EngineEvent::new(EngineEventType::Failed, &event_task)
                            .with_meta("source", source.as_str())
                            .with_meta("error", e.to_string()),
                    );
                }
            }
        })
    }

    /// Move one recovered record into the pool.
    fn recover(self: &Arc<Self>, record: DiskRecord, permit: Permit) {
        let DiskRecord { next_position, message } = record;
        let task = Task::new(message);
        self.counters.recovered.fetch_add(1, Ordering::Relaxed);
        self.publish(EngineEvent::new(EngineEventType::RecoveredFromDisk, &task));

        if let Err(e) = self.dispatch(task, permit, EventSource::Disk, Some(next_position)) {
            error!(error = %e, "failed to re-append rejected disk record");
        }
    }

    fn stop_draining(&self, err: &QueueError) {
        error!(error = %err, "disk queue failure; drainer stopping, backlog will not be recovered");
        *self.drain_failure.lock() = Some(err.to_string());
    }
}

fn drain_loop<H: MessageHandler>(shared: &Arc<Shared<H>>) {
    debug!("disk drainer started");
    while shared.running.load(Ordering::Acquire) {
        match shared.queue.is_empty() {
            Ok(true) => {
                shared.await_signal();
                continue;
            }
            Ok(false) => {}
            Err(e) => {
                shared.stop_draining(&e);
                break;
            }
        }

        let Some(permit) = shared.permits.try_acquire_for(shared.config.drain_poll_interval()) else {
            continue;
        };

        match shared.queue.poll() {
            Ok(Some(record)) => shared.recover(record, permit),
            // Emptied between the check and the poll; `permit` drops here.
            Ok(None) => {}
            Err(e) => {
                shared.stop_draining(&e);
                break;
            }
        }
    }
    debug!("disk drainer exiting");
}
