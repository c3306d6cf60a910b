//! Priority task scheduler
//!
//! Bounded pool of tokio tasks. Work beyond `max_concurrent` waits in a
//! binary heap ordered by priority, FIFO within one priority. A finished task
//! hands its slot straight to the next queued one. Tasks may carry a group
//! tag so that one caller's pending work can be dropped without touching
//! anyone else's.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Normal
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task was removed from the queue before it started")]
    Cancelled,

    #[error("task panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub max_concurrent: usize,
    pub active_tasks: usize,
    pub queued_tasks: usize,
}

type StartFn = Box<dyn FnOnce(SlotGuard) + Send>;

struct QueuedTask {
    group: Option<String>,
    priority: TaskPriority,
    sequence: u64,
    enqueued_at: Instant,
    start: StartFn,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // Higher priority first, then earlier submission
        match self.priority.cmp(&other.priority) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            other => other,
        }
    }
}

struct SchedulerState {
    queue: BinaryHeap<QueuedTask>,
    active: usize,
    next_sequence: u64,
}

struct Inner {
    max_concurrent: usize,
    state: Mutex<SchedulerState>,
}

/// Held by a running task; dropping it frees the slot or passes it on.
struct SlotGuard {
    inner: Arc<Inner>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let next = {
            let mut state = self.inner.state.lock();
            match state.queue.pop() {
                Some(task) => Some(task),
                None => {
                    state.active = state.active.saturating_sub(1);
                    None
                }
            }
        };

        if let Some(task) = next {
            debug!(
                priority = ?task.priority,
                waited_ms = task.enqueued_at.elapsed().as_millis() as u64,
                "Dispatching queued task"
            );
            (task.start)(SlotGuard {
                inner: self.inner.clone(),
            });
        }
    }
}

/// Completion handle for a submitted task
pub struct TaskHandle<T> {
    rx: oneshot::Receiver<Result<T, SchedulerError>>,
}

impl<T> TaskHandle<T> {
    /// Wait for the task's output. Dropping the handle does not cancel the task.
    pub async fn join(self) -> Result<T, SchedulerError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::Cancelled),
        }
    }
}

/// Cheap to clone; clones share the same pool.
#[derive(Clone)]
pub struct PriorityScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("stats", &self.get_queue_stats())
            .finish()
    }
}

impl PriorityScheduler {
    pub fn new(max_concurrent_tasks: usize) -> Self {
        let max_concurrent = max_concurrent_tasks.max(1);
        info!(max_concurrent, "Priority scheduler created");

        Self {
            inner: Arc::new(Inner {
                max_concurrent,
                state: Mutex::new(SchedulerState {
                    queue: BinaryHeap::new(),
                    active: 0,
                    next_sequence: 0,
                }),
            }),
        }
    }

    /// Run `work` now if a slot is free, otherwise queue it.
    ///
    /// Must be called from within a tokio runtime. A panic inside `work` is
    /// reported through the handle and leaves the pool intact.
    pub fn submit_task<F, T>(&self, priority: TaskPriority, work: F) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(None, priority, work)
    }

    /// Like [`submit_task`](Self::submit_task), tagging the task with `group`
    /// so [`clear_group`](Self::clear_group) can drop it while it waits.
    pub fn submit_task_for<F, T>(
        &self,
        group: impl Into<String>,
        priority: TaskPriority,
        work: F,
    ) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        self.enqueue(Some(group.into()), priority, work)
    }

    fn enqueue<F, T>(
        &self,
        group: Option<String>,
        priority: TaskPriority,
        work: F,
    ) -> TaskHandle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let start: StartFn = Box::new(move |guard: SlotGuard| {
            tokio::spawn(async move {
                let _guard = guard;
                let result = AssertUnwindSafe(work)
                    .catch_unwind()
                    .await
                    .map_err(|panic| SchedulerError::Panicked(panic_message(panic.as_ref())));
                if let Err(SchedulerError::Panicked(message)) = &result {
                    warn!(priority = ?priority, panic = %message, "Scheduled task panicked");
                }
                let _ = tx.send(result);
            });
        });

        let immediate = {
            let mut state = self.inner.state.lock();
            if state.active < self.inner.max_concurrent {
                state.active += 1;
                Some(start)
            } else {
                let sequence = state.next_sequence;
                state.next_sequence += 1;
                state.queue.push(QueuedTask {
                    group,
                    priority,
                    sequence,
                    enqueued_at: Instant::now(),
                    start,
                });
                debug!(
                    priority = ?priority,
                    queued = state.queue.len(),
                    "Pool full, task queued"
                );
                None
            }
        };

        if let Some(start) = immediate {
            start(SlotGuard {
                inner: self.inner.clone(),
            });
        }

        TaskHandle { rx }
    }

    pub fn get_queue_stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            max_concurrent: self.inner.max_concurrent,
            active_tasks: state.active,
            queued_tasks: state.queue.len(),
        }
    }

    /// Drop every task that has not started. Running tasks are untouched;
    /// handles of dropped tasks resolve to [`SchedulerError::Cancelled`].
    pub fn clear_queue(&self) -> usize {
        let drained: Vec<QueuedTask> = {
            let mut state = self.inner.state.lock();
            state.queue.drain().collect()
        };

        if !drained.is_empty() {
            info!(cancelled = drained.len(), "Cleared scheduler queue");
        }
        drained.len()
    }

    /// Drop the not-yet-started tasks tagged with `group`. Other queued work
    /// keeps its place; handles of dropped tasks resolve to
    /// [`SchedulerError::Cancelled`].
    pub fn clear_group(&self, group: &str) -> usize {
        let dropped: Vec<QueuedTask> = {
            let mut state = self.inner.state.lock();
            let (dropped, kept): (Vec<_>, Vec<_>) = state
                .queue
                .drain()
                .partition(|task| task.group.as_deref() == Some(group));
            state.queue.extend(kept);
            dropped
        };

        if !dropped.is_empty() {
            info!(group, cancelled = dropped.len(), "Cleared queued tasks for group");
        }
        dropped.len()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
