//! Task slots, handles and the resolution board shared by workers and waiters.
//!
//! # Lock Order
//! board → slot. Workers and handles release a slot lock before touching the board.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::observability::metrics;

/// Submission-order index of a task within its pool.
pub type TaskId = usize;

/// Lifecycle of a submitted task. Each task reaches exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    TimedOut,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Running)
    }
}

struct SlotState<T> {
    status: TaskStatus,
    started: Option<Instant>,
    outcome: Option<Result<T>>,
}

pub(crate) struct TaskSlot<T> {
    id: TaskId,
    state: Mutex<SlotState<T>>,
    done: Condvar,
}

impl<T> TaskSlot<T> {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            state: Mutex::new(SlotState {
                status: TaskStatus::Queued,
                started: None,
                outcome: None,
            }),
            done: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.state.lock().status
    }

    /// Queued → Running. Returns the start time, or `None` if the task was cancelled first.
    pub(crate) fn start(&self) -> Option<Instant> {
        let mut state = self.state.lock();
        if state.status != TaskStatus::Queued {
            return None;
        }
        let now = Instant::now();
        state.status = TaskStatus::Running;
        state.started = Some(now);
        Some(now)
    }

    /// Running → Succeeded/Failed. False if the waiter already gave up on this task.
    pub(crate) fn complete(&self, outcome: Result<T>) -> bool {
        let status = if outcome.is_ok() {
            TaskStatus::Succeeded
        } else {
            TaskStatus::Failed
        };
        self.resolve(TaskStatus::Running, status, outcome)
    }

    /// Queued → Cancelled.
    pub(crate) fn cancel_queued(&self) -> bool {
        self.resolve(TaskStatus::Queued, TaskStatus::Cancelled, Err(Error::Cancelled))
    }

    /// Running → TimedOut once `timeout` has elapsed since the task started.
    pub(crate) fn expire(&self, timeout: Duration) -> bool {
        let overdue = {
            let state = self.state.lock();
            state.status == TaskStatus::Running
                && state.started.is_some_and(|started| started.elapsed() >= timeout)
        };
        overdue && self.resolve(TaskStatus::Running, TaskStatus::TimedOut, Err(Error::TaskTimeout(timeout)))
    }

    /// When a running task will be overdue. `None` if it is not running or the
    /// deadline lies beyond what an `Instant` can represent.
    pub(crate) fn deadline(&self, timeout: Duration) -> Option<Instant> {
        let state = self.state.lock();
        match state.status {
            TaskStatus::Running => state.started.and_then(|started| started.checked_add(timeout)),
            _ => None,
        }
    }

    pub(crate) fn take_outcome(&self) -> Option<Result<T>> {
        self.state.lock().outcome.take()
    }

    /// Resolved and its outcome already handed to a waiter.
    pub(crate) fn is_collected(&self) -> bool {
        let state = self.state.lock();
        state.status.is_terminal() && state.outcome.is_none()
    }

    fn resolve(&self, expected: TaskStatus, status: TaskStatus, outcome: Result<T>) -> bool {
        let mut state = self.state.lock();
        if state.status != expected {
            return false;
        }
        state.status = status;
        state.outcome = Some(outcome);
        self.done.notify_all();
        true
    }

    fn wait(&self, timeout: Option<Duration>) -> TaskStatus {
        let deadline = timeout.and_then(|t| Instant::now().checked_add(t));
        let mut state = self.state.lock();
        while !state.status.is_terminal() {
            match deadline {
                Some(deadline) => {
                    if self.done.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                None => self.done.wait(&mut state),
            }
        }
        state.status
    }
}

#[derive(Debug, Default)]
pub(crate) struct Board {
    /// Resolved task ids in resolution order, not yet consumed by a waiter.
    pub(crate) resolved: VecDeque<TaskId>,
    pub(crate) cancel_requested: bool,
}

/// Every task a pool has accepted, plus the resolution board waiters block on.
pub(crate) struct TaskBoard<T> {
    tasks: Mutex<Vec<Arc<TaskSlot<T>>>>,
    pub(crate) board: Mutex<Board>,
    pub(crate) changed: Condvar,
    outstanding: AtomicUsize,
}

impl<T> TaskBoard<T> {
    pub(crate) fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
            board: Mutex::new(Board::default()),
            changed: Condvar::new(),
            outstanding: AtomicUsize::new(0),
        }
    }

    pub(crate) fn register(&self) -> Arc<TaskSlot<T>> {
        let mut tasks = self.tasks.lock();
        let slot = Arc::new(TaskSlot::new(tasks.len()));
        tasks.push(slot.clone());
        let outstanding = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_outstanding_tasks(outstanding);
        slot
    }

    pub(crate) fn slots(&self) -> Vec<Arc<TaskSlot<T>>> {
        self.tasks.lock().clone()
    }

    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn is_cancel_requested(&self) -> bool {
        self.board.lock().cancel_requested
    }

    /// Set the cancel flag. Returns false if it was already set.
    pub(crate) fn request_cancel(&self) -> bool {
        let mut board = self.board.lock();
        if board.cancel_requested {
            return false;
        }
        board.cancel_requested = true;
        self.changed.notify_all();
        true
    }

    /// Wake waiters without publishing anything.
    pub(crate) fn notify(&self) {
        let _board = self.board.lock();
        self.changed.notify_all();
    }

    /// Publish a resolution. The caller must not hold the slot lock.
    pub(crate) fn publish(&self, id: TaskId) {
        let outstanding = self.outstanding.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_outstanding_tasks(outstanding);

        let mut board = self.board.lock();
        board.resolved.push_back(id);
        self.changed.notify_all();
    }

    /// Cancel every task that has not started. Returns how many were cancelled.
    pub(crate) fn cancel_queued(&self) -> usize {
        let mut cancelled = 0;
        for slot in self.slots() {
            if slot.cancel_queued() {
                self.publish(slot.id());
                metrics::record_task_outcome("cancelled", None);
                cancelled += 1;
            }
        }
        cancelled
    }
}

/// Handle to a submitted task.
///
/// The value itself is delivered through `wait_completion`; the handle only
/// observes status and can cancel the task before it starts.
pub struct TaskHandle<T> {
    slot: Arc<TaskSlot<T>>,
    board: Arc<TaskBoard<T>>,
}

impl<T> TaskHandle<T> {
    pub(crate) fn new(slot: Arc<TaskSlot<T>>, board: Arc<TaskBoard<T>>) -> Self {
        Self { slot, board }
    }

    pub fn id(&self) -> TaskId {
        self.slot.id()
    }

    pub fn status(&self) -> TaskStatus {
        self.slot.status()
    }

    pub fn is_done(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the task resolves or `timeout` elapses. Returns the status seen last.
    pub fn wait(&self, timeout: Option<Duration>) -> TaskStatus {
        self.slot.wait(timeout)
    }

    /// Cancel the task if it has not started yet.
    pub fn cancel(&self) -> bool {
        if self.slot.cancel_queued() {
            self.board.publish(self.slot.id());
            metrics::record_task_outcome("cancelled", None);
            true
        } else {
            false
        }
    }
}

impl<T> Clone for TaskHandle<T> {
    fn clone(&self) -> Self {
        Self {
            slot: self.slot.clone(),
            board: self.board.clone(),
        }
    }
}

impl<T> fmt::Debug for TaskHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_slot_lifecycle() {
        let slot: TaskSlot<u32> = TaskSlot::new(0);
        assert_eq!(slot.status(), TaskStatus::Queued);
        assert!(slot.start().is_some());
        assert!(slot.start().is_none());
        assert!(!slot.cancel_queued());
        assert!(slot.complete(Ok(5)));
        assert_eq!(slot.status(), TaskStatus::Succeeded);
        assert_eq!(slot.take_outcome(), Some(Ok(5)));
    }

    #[test]
    fn test_cancelled_slot_never_starts() {
        let slot: TaskSlot<()> = TaskSlot::new(3);
        assert!(slot.cancel_queued());
        assert!(slot.start().is_none());
        assert_eq!(slot.status(), TaskStatus::Cancelled);
        assert_eq!(slot.take_outcome(), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn test_expired_slot_drops_late_result() {
        let slot: TaskSlot<&str> = TaskSlot::new(1);
        slot.start();
        assert!(!slot.expire(Duration::from_secs(10)));
        thread::sleep(Duration::from_millis(20));
        assert!(slot.expire(Duration::from_millis(10)));
        assert!(!slot.complete(Ok("late")));
        assert_eq!(slot.status(), TaskStatus::TimedOut);
        assert_eq!(slot.take_outcome(), Some(Err(Error::TaskTimeout(Duration::from_millis(10)))));
    }

    #[test]
    fn test_handle_cancel_publishes_once() {
        let board: Arc<TaskBoard<()>> = Arc::new(TaskBoard::new());
        let handle = TaskHandle::new(board.register(), board.clone());
        assert_eq!(board.outstanding(), 1);

        assert!(handle.cancel());
        assert!(!handle.cancel());
        assert!(handle.is_done());
        assert_eq!(board.outstanding(), 0);
        assert_eq!(board.board.lock().resolved.len(), 1);
    }

    #[test]
    fn test_handle_wait_times_out_on_running_task() {
        let board: Arc<TaskBoard<()>> = Arc::new(TaskBoard::new());
        let slot = board.register();
        slot.start();
        let handle = TaskHandle::new(slot, board);
        assert_eq!(handle.wait(Some(Duration::from_millis(20))), TaskStatus::Running);
    }

    #[test]
    fn test_unrepresentable_deadline_is_none() {
        let slot: TaskSlot<()> = TaskSlot::new(0);
        slot.start();
        assert!(slot.deadline(Duration::MAX).is_none());
        assert!(slot.deadline(Duration::from_secs(1)).is_some());
        assert!(!slot.expire(Duration::MAX));
    }

    #[test]
    fn test_handle_wait_with_huge_timeout() {
        let board: Arc<TaskBoard<u8>> = Arc::new(TaskBoard::new());
        let slot = board.register();
        slot.start();
        let handle = TaskHandle::new(slot.clone(), board);

        let finisher = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            slot.complete(Ok(1))
        });
        assert_eq!(handle.wait(Some(Duration::MAX)), TaskStatus::Succeeded);
        assert!(finisher.join().unwrap());
    }

    #[test]
    fn test_collected_after_outcome_taken() {
        let slot: TaskSlot<u8> = TaskSlot::new(0);
        assert!(!slot.is_collected());
        slot.start();
        slot.complete(Ok(2));
        assert!(!slot.is_collected());
        slot.take_outcome();
        assert!(slot.is_collected());
    }
}
