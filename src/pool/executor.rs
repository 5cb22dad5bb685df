//! Cancellable fixed-size worker pool.
//!
//! # Responsibilities
//! - Run submitted tasks on a fixed set of worker threads
//! - Collect every task outcome without letting one failure abort the rest
//! - Cooperative cancellation and per-task deadlines
//! - Release every worker thread on shutdown
//!
//! # Design Decisions
//! - Workers start on the first submit and pull jobs from a `BoundedQueue`;
//!   a full buffer blocks `submit`
//! - Closing the queue is how workers are told to exit
//! - Running tasks are never interrupted. A task past its deadline is
//!   recorded as `TaskTimeout` and its eventual result is dropped

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::config::PoolConfig;
use crate::error::{panic_message, Error, Result};
use crate::observability::metrics;
use crate::pool::queue::BoundedQueue;
use crate::pool::task::{TaskBoard, TaskHandle, TaskSlot};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runtime pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub workers: usize,
    /// Deadline per task, measured from when a worker starts it.
    pub task_timeout: Duration,
    pub queue_capacity: usize,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::from(&PoolConfig::default())
    }
}

impl From<&PoolConfig> for PoolOptions {
    fn from(config: &PoolConfig) -> Self {
        Self {
            workers: config.workers,
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            queue_capacity: config.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    /// No task submitted yet; no threads exist.
    Created,
    Running,
    /// `wait_completion` is collecting results; new submissions are rejected.
    Draining,
    /// Cancel requested; workers finish their current task and exit.
    Cancelling,
    ShutDown,
}

/// Outcomes gathered by [`CancellableThreadPool::wait_completion`], in resolution order.
#[derive(Debug)]
pub struct CompletionReport<T> {
    pub results: Vec<T>,
    pub failures: Vec<Error>,
}

impl<T> Default for CompletionReport<T> {
    fn default() -> Self {
        Self {
            results: Vec::new(),
            failures: Vec::new(),
        }
    }
}

impl<T> CompletionReport<T> {
    pub fn total(&self) -> usize {
        self.results.len() + self.failures.len()
    }
}

pub struct CancellableThreadPool<T> {
    options: PoolOptions,
    tasks: Arc<TaskBoard<T>>,
    queue: Arc<BoundedQueue<Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    state: Mutex<PoolState>,
    successes: AtomicUsize,
    errors: AtomicUsize,
}

impl<T: Send + 'static> CancellableThreadPool<T> {
    pub fn new(options: PoolOptions) -> Self {
        Self {
            options,
            tasks: Arc::new(TaskBoard::new()),
            queue: Arc::new(BoundedQueue::named("pool_tasks", options.queue_capacity)),
            workers: Mutex::new(Vec::new()),
            state: Mutex::new(PoolState::Created),
            successes: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        }
    }

    pub fn with_workers(workers: usize, task_timeout: Duration) -> Self {
        Self::new(PoolOptions {
            workers,
            task_timeout,
            ..PoolOptions::default()
        })
    }

    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Queue `f` for execution.
    ///
    /// Returns `None` (and logs a warning) once cancellation was requested or the
    /// pool is draining or shut down.
    pub fn submit<F>(&self, f: F) -> Option<TaskHandle<T>>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
    {
        {
            let mut state = self.state.lock();
            match *state {
                PoolState::Created => {
                    if let Err(e) = self.spawn_workers() {
                        tracing::error!(error = %e, "Failed to start pool workers");
                        return None;
                    }
                    *state = PoolState::Running;
                }
                PoolState::Running => {}
                PoolState::Cancelling => {
                    tracing::warn!("Cannot submit task: cancellation in progress");
                    return None;
                }
                other => {
                    tracing::warn!(state = ?other, "Cannot submit task: pool is not accepting work");
                    return None;
                }
            }
        }

        let slot = self.tasks.register();
        let job: Job = {
            let tasks = self.tasks.clone();
            let slot = slot.clone();
            Box::new(move || execute(&tasks, &slot, f))
        };

        if let Err(e) = self.queue.put(job, None) {
            tracing::warn!(task = slot.id(), error = %e, "Task rejected, pool closed while submitting");
            if slot.cancel_queued() {
                self.tasks.publish(slot.id());
            }
            return None;
        }

        tracing::trace!(task = slot.id(), "Task submitted");
        Some(TaskHandle::new(slot, self.tasks.clone()))
    }

    /// Block until every task submitted so far resolves.
    ///
    /// Each outcome is reported once. A later call returns only what earlier
    /// calls did not collect, so calling it again on a finished pool returns an
    /// empty report.
    ///
    /// `progress(completed, total)` runs after each resolution, in resolution
    /// order. Fails with `Cancelled` if cancellation is requested. The pool is
    /// shut down (waiting for workers) before this returns, on every path.
    pub fn wait_completion<P>(&self, mut progress: P) -> Result<CompletionReport<T>>
    where
        P: FnMut(usize, usize),
    {
        {
            let mut state = self.state.lock();
            if matches!(*state, PoolState::Created | PoolState::Running) {
                *state = PoolState::Draining;
            }
        }

        let mut report = CompletionReport::default();
        let outcome = self.collect(&mut report, &mut progress);
        self.shutdown(true);

        self.successes.fetch_add(report.results.len(), Ordering::SeqCst);
        self.errors.fetch_add(report.failures.len(), Ordering::SeqCst);

        match outcome {
            Ok(()) => {
                tracing::info!(
                    succeeded = report.results.len(),
                    failed = report.failures.len(),
                    "Pool tasks completed"
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!(
                    completed = report.total(),
                    "Cancellation requested during wait_completion"
                );
                Err(e)
            }
        }
    }

    fn collect<P>(&self, report: &mut CompletionReport<T>, progress: &mut P) -> Result<()>
    where
        P: FnMut(usize, usize),
    {
        let slots = self.tasks.slots();
        // Outcomes handed out by an earlier call are not waited for again.
        let mut seen: Vec<bool> = slots.iter().map(|slot| slot.is_collected()).collect();
        let total = seen.iter().filter(|collected| !**collected).count();
        let timeout = self.options.task_timeout;
        let mut completed = 0;

        while completed < total {
            let next = {
                let mut board = self.tasks.board.lock();
                loop {
                    if board.cancel_requested {
                        break Err(Error::Cancelled);
                    }
                    if let Some(id) = board.resolved.pop_front() {
                        break Ok(Some(id));
                    }
                    let deadline = slots
                        .iter()
                        .filter(|slot| !seen[slot.id()])
                        .filter_map(|slot| slot.deadline(timeout))
                        .min();
                    match deadline {
                        Some(deadline) => {
                            if self.tasks.changed.wait_until(&mut board, deadline).timed_out() {
                                break Ok(None);
                            }
                        }
                        None => self.tasks.changed.wait(&mut board),
                    }
                }
            };

            match next? {
                Some(id) => {
                    let Some(slot) = slots.get(id) else {
                        continue;
                    };
                    if seen[id] {
                        continue;
                    }
                    seen[id] = true;
                    completed += 1;

                    match slot.take_outcome() {
                        Some(Ok(value)) => report.results.push(value),
                        Some(Err(error)) => {
                            tracing::warn!(task = id, kind = %error.kind(), error = %error, "Task failed");
                            report.failures.push(error);
                        }
                        None => {}
                    }
                    progress(completed, total);
                }
                None => self.expire_overdue(&slots),
            }
        }
        Ok(())
    }

    fn expire_overdue(&self, slots: &[Arc<TaskSlot<T>>]) {
        let timeout = self.options.task_timeout;
        for slot in slots {
            if slot.expire(timeout) {
                tracing::warn!(
                    task = slot.id(),
                    timeout_secs = timeout.as_secs_f64(),
                    "Task timeout, abandoning"
                );
                metrics::record_task_outcome("timed_out", None);
                self.tasks.publish(slot.id());
            }
        }
    }

    /// Request cancellation. Idempotent.
    ///
    /// Tasks not yet started resolve as `Cancelled` and never run. Running tasks
    /// finish on their own; workers exit afterwards without being joined here.
    pub fn cancel(&self) {
        {
            // Flag and state change together under the state lock.
            let mut state = self.state.lock();
            if !self.tasks.request_cancel() {
                return;
            }
            if *state != PoolState::ShutDown {
                *state = PoolState::Cancelling;
            }
        }

        self.queue.close();
        drop(self.queue.drain());
        let cancelled = self.tasks.cancel_queued();

        tracing::info!(workers = self.options.workers, cancelled, "Cancelling thread pool");
        self.shutdown(false);
    }

    /// Stop accepting work and release the workers.
    ///
    /// Buffered tasks still run unless the pool was cancelled. With `wait`, blocks
    /// until every worker has exited.
    pub fn shutdown(&self, wait: bool) {
        self.queue.close();

        if wait {
            let workers = std::mem::take(&mut *self.workers.lock());
            for worker in workers {
                if worker.join().is_err() {
                    tracing::warn!("Pool worker exited abnormally");
                }
            }
            *self.state.lock() = PoolState::ShutDown;
            tracing::debug!("Thread pool shutdown complete");
        } else {
            let mut state = self.state.lock();
            if *state != PoolState::Cancelling {
                *state = PoolState::ShutDown;
            }
        }
    }

    pub fn state(&self) -> PoolState {
        let state = *self.state.lock();
        if state == PoolState::Cancelling && self.live_workers() == 0 {
            PoolState::ShutDown
        } else {
            state
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.tasks.is_cancel_requested()
    }

    /// Successes collected across `wait_completion` calls.
    pub fn success_count(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    /// Failures (including timeouts and cancellations) collected across `wait_completion` calls.
    pub fn error_count(&self) -> usize {
        self.errors.load(Ordering::SeqCst)
    }

    /// Tasks submitted but not yet resolved.
    pub fn outstanding(&self) -> usize {
        self.tasks.outstanding()
    }

    /// Worker threads that have not exited yet.
    pub fn live_workers(&self) -> usize {
        self.workers.lock().iter().filter(|w| !w.is_finished()).count()
    }

    fn spawn_workers(&self) -> std::io::Result<()> {
        let mut workers = self.workers.lock();
        for index in 0..self.options.workers.max(1) {
            let queue = self.queue.clone();
            let handle = thread::Builder::new()
                .name(format!("pool-worker-{index}"))
                .spawn(move || worker_loop(&queue))?;
            workers.push(handle);
        }
        tracing::debug!(workers = workers.len(), "Pool workers started");
        Ok(())
    }
}

impl<T> Drop for CancellableThreadPool<T> {
    fn drop(&mut self) {
        self.queue.close();
        for worker in self.workers.get_mut().drain(..) {
            let _ = worker.join();
        }
    }
}

fn worker_loop(queue: &BoundedQueue<Job>) {
    while let Ok(job) = queue.get(None) {
        job();
    }
    tracing::trace!("Pool worker exiting");
}

fn execute<T, F>(tasks: &TaskBoard<T>, slot: &TaskSlot<T>, f: F)
where
    F: FnOnce() -> Result<T>,
{
    // Cancel flag is checked before the task is claimed.
    if tasks.is_cancel_requested() {
        if slot.cancel_queued() {
            tasks.publish(slot.id());
        }
        return;
    }
    let Some(started) = slot.start() else {
        tracing::trace!(task = slot.id(), "Skipping cancelled task");
        return;
    };
    // Waiters track deadlines of running tasks.
    tasks.notify();

    let outcome = panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(Error::Panicked(panic_message(payload.as_ref()))));

    let label = match &outcome {
        Ok(_) => "succeeded",
        Err(Error::Panicked(message)) => {
            tracing::error!(task = slot.id(), panic = %message, "Task panicked");
            "panicked"
        }
        Err(_) => "failed",
    };

    if slot.complete(outcome) {
        metrics::record_task_outcome(label, Some(started));
        tasks.publish(slot.id());
    } else {
        tracing::debug!(
            task = slot.id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Abandoned task finished, result dropped"
        );
    }
}
