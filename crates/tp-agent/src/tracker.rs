//! Task tracker: lifecycle records for units of agent work.
//!
//! Every status transition is reported synchronously to all observers.
//! Observer failures (errors or panics) are logged and never reach the
//! task being tracked.

use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tp_protocol::{Task, TaskStatus};
use uuid::Uuid;

use crate::error::TrackerError;

/// Notified on every task status change.
pub trait TaskObserver: Send + Sync {
    fn on_transition(&self, task: &Task) -> anyhow::Result<()>;
}

impl<F> TaskObserver for F
where
    F: Fn(&Task) -> anyhow::Result<()> + Send + Sync,
{
    fn on_transition(&self, task: &Task) -> anyhow::Result<()> {
        self(task)
    }
}

struct Entry {
    task: Task,
    cancelled: Arc<AtomicBool>,
}

/// Handle given to running work.
pub struct TaskContext<'a> {
    tracker: &'a TaskTracker,
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl TaskContext<'_> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Report progress in `[0, 1]` (clamped).
    pub fn set_progress(&self, progress: f64) {
        if let Some(entry) = self.tracker.lock_tasks().iter_mut().find(|e| e.task.id == self.id) {
            entry.task.set_progress(progress);
        }
    }

    /// Cooperative cancellation flag.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct TaskTracker {
    tasks: Mutex<Vec<Entry>>,
    observers: Mutex<Vec<Arc<dyn TaskObserver>>>,
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer(&self, observer: Arc<dyn TaskObserver>) {
        self.observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(observer);
    }

    /// Register a new PENDING task.
    pub fn create(&self, description: impl Into<String>) -> Task {
        let task = Task::new(description);
        tracing::debug!(task_id = %task.id, description = %task.description, "task created");
        self.lock_tasks().push(Entry {
            task: task.clone(),
            cancelled: Arc::new(AtomicBool::new(false)),
        });
        task
    }

    /// Run `work` for a PENDING task: RUNNING, then COMPLETED with the
    /// returned value or FAILED with the error. A task cancelled while its
    /// work was running stays CANCELLED.
    pub async fn dispatch<'a, F, Fut>(&'a self, id: Uuid, work: F) -> Result<Task, TrackerError>
    where
        F: FnOnce(TaskContext<'a>) -> Fut,
        Fut: Future<Output = Result<Value, String>>,
    {
        let (running, cancelled) = {
            let mut tasks = self.lock_tasks();
            let entry = find(&mut tasks, id)?;
            entry.task.transition(TaskStatus::Running)?;
            (entry.task.clone(), entry.cancelled.clone())
        };
        tracing::info!(task_id = %id, description = %running.description, "task running");
        self.notify(&running);

        let outcome = work(TaskContext {
            tracker: self,
            id,
            cancelled,
        })
        .await;

        let finished = {
            let mut tasks = self.lock_tasks();
            let entry = find(&mut tasks, id)?;
            if entry.task.status == TaskStatus::Cancelled {
                tracing::info!(task_id = %id, "task was cancelled while running");
                return Ok(entry.task.clone());
            }
            match outcome {
                Ok(value) => {
                    entry.task.result = Some(value);
                    entry.task.transition(TaskStatus::Completed)?;
                }
                Err(error) => {
                    tracing::warn!(task_id = %id, error = %error, "task failed");
                    entry.task.error = Some(error);
                    entry.task.transition(TaskStatus::Failed)?;
                }
            }
            entry.task.clone()
        };
        self.notify(&finished);
        Ok(finished)
    }

    /// Cancel a PENDING or RUNNING task. Returns false if it is unknown or
    /// already finished.
    pub fn cancel(&self, id: Uuid) -> bool {
        let cancelled = {
            let mut tasks = self.lock_tasks();
            let Some(entry) = tasks.iter_mut().find(|e| e.task.id == id) else {
                return false;
            };
            if entry.task.transition(TaskStatus::Cancelled).is_err() {
                return false;
            }
            entry.cancelled.store(true, Ordering::SeqCst);
            entry.task.clone()
        };
        tracing::info!(task_id = %id, "task cancelled");
        self.notify(&cancelled);
        true
    }

    /// Cancel every RUNNING task; returns how many were cancelled.
    pub fn cancel_running(&self) -> usize {
        let running: Vec<Uuid> = self
            .lock_tasks()
            .iter()
            .filter(|e| e.task.status == TaskStatus::Running)
            .map(|e| e.task.id)
            .collect();
        running.into_iter().filter(|id| self.cancel(*id)).count()
    }

    pub fn get(&self, id: Uuid) -> Option<Task> {
        self.lock_tasks()
            .iter()
            .find(|e| e.task.id == id)
            .map(|e| e.task.clone())
    }

    /// All tasks in creation order.
    pub fn all(&self) -> Vec<Task> {
        self.lock_tasks().iter().map(|e| e.task.clone()).collect()
    }

    fn notify(&self, task: &Task) {
        let observers = self
            .observers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_transition(task))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(task_id = %task.id, error = %e, "task observer failed");
                }
                Err(_) => {
                    tracing::error!(task_id = %task.id, "task observer panicked");
                }
            }
        }
    }

    fn lock_tasks(&self) -> MutexGuard<'_, Vec<Entry>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn find(tasks: &mut [Entry], id: Uuid) -> Result<&mut Entry, TrackerError> {
    tasks
        .iter_mut()
        .find(|e| e.task.id == id)
        .ok_or(TrackerError::NotFound(id))
}
