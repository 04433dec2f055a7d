//! In-memory task registry.
//!
//! [`TaskRegistry`] maps task identifiers to [`Task`] records behind a single
//! [`RwLock`]. It lives for the lifetime of the process and is never
//! persisted. Status changes go through compare-and-set transitions, so a
//! task leaves `processing` exactly once no matter how many writers race.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use ac_core::{Error, Result, TaskId};

/// Lifecycle state of a conversion task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TaskStatus::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

/// One conversion request's tracked lifecycle record.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub source_url: String,
    pub status: TaskStatus,
    /// File name of the converted output inside the output directory.
    pub output_file: String,
    /// Failure detail, set only when `status` is `Failed`.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    cancel: CancellationToken,
}

impl Task {
    fn new(source_url: &str, extension: &str, cancel: CancellationToken) -> Self {
        let id = TaskId::new();
        Self {
            id,
            source_url: source_url.to_string(),
            status: TaskStatus::Processing,
            output_file: format!("{id}.{extension}"),
            error: None,
            created_at: Utc::now(),
            finished_at: None,
            cancel,
        }
    }

    /// Token cancelled when the task is cancelled or the server shuts down.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn finish(&mut self, status: TaskStatus, error: Option<String>) -> Result<()> {
        if self.status.is_terminal() {
            return Err(Error::Conflict(format!(
                "task {} is already {}",
                self.id,
                self.status.as_str()
            )));
        }
        self.status = status;
        self.error = error;
        self.finished_at = Some(Utc::now());
        Ok(())
    }
}

/// Number of tracked tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskCounts {
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Thread-safe map from task id to task record.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task in the `processing` state.
    ///
    /// `cancel` is the token the worker watches; pass a child of the server
    /// shutdown token so shutdown reaches every task.
    pub fn create(&self, source_url: &str, extension: &str, cancel: CancellationToken) -> Task {
        let mut tasks = self.tasks.write();
        let mut task = Task::new(source_url, extension, cancel.clone());
        // v4 collisions are practically impossible, but an id is never reissued.
        while tasks.contains_key(&task.id) {
            task = Task::new(source_url, extension, cancel.clone());
        }
        tasks.insert(task.id, task.clone());
        task
    }

    /// Snapshot of a task.
    pub fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.read().get(&id).cloned()
    }

    /// Transition `processing → completed`.
    pub fn complete(&self, id: TaskId) -> Result<Task> {
        self.transition(id, TaskStatus::Completed, None)
    }

    /// Transition `processing → failed`, recording `detail`.
    pub fn fail(&self, id: TaskId, detail: &str) -> Result<Task> {
        self.transition(id, TaskStatus::Failed, Some(detail.to_string()))
    }

    /// Mark a processing task failed and signal its worker to stop.
    pub fn cancel(&self, id: TaskId) -> Result<Task> {
        let task = self.fail(id, &Error::Cancelled.to_string())?;
        task.cancel.cancel();
        Ok(task)
    }

    fn transition(&self, id: TaskId, status: TaskStatus, error: Option<String>) -> Result<Task> {
        let mut tasks = self.tasks.write();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("task", id))?;
        task.finish(status, error)?;
        Ok(task.clone())
    }

    pub fn counts(&self) -> TaskCounts {
        let tasks = self.tasks.read();
        let mut counts = TaskCounts::default();
        for task in tasks.values() {
            match task.status {
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.tasks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.read().is_empty()
    }

    /// Output file names of every tracked task.
    pub fn output_files(&self) -> HashSet<String> {
        self.tasks
            .read()
            .values()
            .map(|t| t.output_file.clone())
            .collect()
    }

    /// Remove finished tasks older than `ttl`, then the oldest finished tasks
    /// while more than `max_tasks` remain. Processing tasks are never removed.
    /// Returns the evicted records.
    pub fn evict(&self, ttl: Duration, max_tasks: usize, now: DateTime<Utc>) -> Vec<Task> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let mut tasks = self.tasks.write();

        let expired: Vec<TaskId> = tasks
            .values()
            .filter(|t| t.finished_at.is_some_and(|f| now - f >= ttl))
            .map(|t| t.id)
            .collect();
        let mut evicted: Vec<Task> = expired.iter().filter_map(|id| tasks.remove(id)).collect();

        if tasks.len() > max_tasks {
            let mut finished: Vec<(DateTime<Utc>, TaskId)> = tasks
                .values()
                .filter_map(|t| t.finished_at.map(|f| (f, t.id)))
                .collect();
            finished.sort_by_key(|(finished_at, _)| *finished_at);

            let excess = tasks.len() - max_tasks;
            for (_, id) in finished.into_iter().take(excess) {
                if let Some(task) = tasks.remove(&id) {
                    evicted.push(task);
                }
            }
        }

        evicted
    }
}
