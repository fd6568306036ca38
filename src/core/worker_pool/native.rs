//! Native implementation of `ExecutionPool` using OS threads.
//!
//! Each worker thread owns a single-threaded tokio runtime and blocks on the shared job
//! channel; there is no polling. Shutdown drops the sender, which lets workers finish
//! every job already queued and then exit once the channel is empty.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::{Job, PoolCounters, PoolError, PoolStats};

/// Fixed-size pool of worker threads executing [`Job`]s in FIFO order.
pub struct ExecutionPool {
    /// Job sender. `None` once shutdown has begun.
    job_tx: Mutex<Option<Sender<Job>>>,

    /// Worker thread handles.
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Each worker sends its id here on exit.
    exit_rx: Receiver<usize>,

    /// Set when graceful termination timed out; workers discard remaining jobs.
    abort: Arc<AtomicBool>,

    counters: Arc<PoolCounters>,
    worker_count: usize,
}

impl ExecutionPool {
    /// Spawn `worker_count` threads with the given stack size.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::InvalidConfig` for a zero worker count or stack size, and
    /// `PoolError::Internal` if a thread cannot be spawned.
    pub fn new(worker_count: usize, stack_size: usize) -> Result<Self, PoolError> {
        if worker_count == 0 {
            return Err(PoolError::InvalidConfig("worker_count must be greater than 0".into()));
        }
        if stack_size == 0 {
            return Err(PoolError::InvalidConfig("stack_size must be greater than 0".into()));
        }

        let (job_tx, job_rx) = unbounded::<Job>();
        let (exit_tx, exit_rx) = unbounded::<usize>();
        let counters = Arc::new(PoolCounters::default());
        let abort = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            // On failure the already-spawned workers exit when `job_tx` is dropped.
            let worker = spawn_worker(
                worker_id,
                job_rx.clone(),
                exit_tx.clone(),
                Arc::clone(&counters),
                Arc::clone(&abort),
                stack_size,
            )
            .map_err(|e| PoolError::Internal(format!("failed to spawn worker {worker_id}: {e}")))?;
            workers.push(worker);
        }

        info!(worker_count, "execution pool started");

        Ok(Self {
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            exit_rx,
            abort,
            counters,
            worker_count,
        })
    }

    /// Queue a job for execution.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::PoolShutdown` once shutdown has begun.
    pub fn execute(&self, job: Job) -> Result<(), PoolError> {
        let job_tx = self.job_tx.lock();
        let Some(job_tx) = job_tx.as_ref() else {
            return Err(PoolError::PoolShutdown);
        };
        self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
        job_tx.send(job).map_err(|_| {
            self.counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
            PoolError::PoolShutdown
        })
    }

    /// `true` once shutdown has begun.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.job_tx.lock().is_none()
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.worker_count)
    }

    /// Stop accepting work, let queued jobs finish, and join the workers.
    ///
    /// Waits up to `timeout` for every worker to exit. Past that, remaining queued jobs
    /// are discarded and unfinished workers are detached. Returns `true` if all workers
    /// exited within the timeout. Calling it again is a no-op returning `true`.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        if self.job_tx.lock().take().is_none() {
            return true;
        }
        info!("shutting down execution pool");

        let mut workers = self.workers.lock();
        let deadline = Instant::now() + timeout;
        let mut exited = 0;
        while exited < workers.len() {
            match self.exit_rx.recv_deadline(deadline) {
                Ok(worker_id) => {
                    debug!(worker_id, "worker exited");
                    exited += 1;
                }
                Err(_) => break,
            }
        }

        if exited < workers.len() {
            warn!(
                exited,
                worker_count = workers.len(),
                "workers did not finish within timeout; discarding queued jobs and detaching"
            );
            self.abort.store(true, Ordering::Release);
            workers.clear();
            return false;
        }

        for (idx, worker) in workers.drain(..).enumerate() {
            if worker.join().is_err() {
                warn!(worker_id = idx, "worker panicked");
            }
        }
        info!(worker_count = self.worker_count, "execution pool shut down");
        true
    }
}

impl Drop for ExecutionPool {
    fn drop(&mut self) {
        // Signal shutdown but don't join; explicit shutdown() is required for that.
        if self.job_tx.lock().take().is_some() {
            debug!("ExecutionPool dropped without explicit shutdown - workers will be detached");
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    job_rx: Receiver<Job>,
    exit_tx: Sender<usize>,
    counters: Arc<PoolCounters>,
    abort: Arc<AtomicBool>,
    stack_size: usize,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("spillway-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => {
                    // recv() errors once the sender is dropped and the queue is empty.
                    while let Ok(job) = job_rx.recv() {
                        counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                        if abort.load(Ordering::Acquire) {
                            // Dropping the job releases whatever it holds.
                            continue;
                        }

                        counters.active_jobs.fetch_add(1, Ordering::Relaxed);
                        if catch_unwind(AssertUnwindSafe(|| rt.block_on(job))).is_err() {
                            error!(worker_id, "job panicked");
                        }
                        counters.active_jobs.fetch_sub(1, Ordering::Relaxed);
                        counters.completed_jobs.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                }
            }

            debug!(worker_id, "worker thread exiting");
            let _ = exit_tx.send(worker_id);
        })
}
