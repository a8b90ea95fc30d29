//! Background batch tasks with explicit lifecycle states.
//!
//! A [`TaskRegistry`] is an owned store, not process-wide state: callers
//! construct one and hand it to whatever polls for results. Submitting a
//! batch returns immediately; the batch runs on the tokio runtime to
//! completion and its final [`TaskState`] is read back as a snapshot.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{PayshotError, Result};
use crate::models::report::BatchReport;
use crate::pipeline::BatchPipeline;

/// Identifier of a submitted batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = PayshotError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| PayshotError::TaskNotFound(s.to_string()))
    }
}

/// Lifecycle of a batch task.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskState {
    Queued,
    Running,
    Completed(BatchReport),
    Failed(String),
}

impl TaskState {
    /// Completed or failed.
    pub fn is_finished(&self) -> bool {
        matches!(self, TaskState::Completed(_) | TaskState::Failed(_))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Completed(_) => "completed",
            TaskState::Failed(_) => "failed",
        }
    }
}

/// Snapshot of one task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskStatus {
    pub id: TaskId,
    pub state: TaskState,
    pub submitted_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
}

/// Store of submitted batch tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskStatus>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `pipeline` in the background under a fresh id.
    pub async fn submit(&self, pipeline: BatchPipeline) -> TaskId {
        let id = TaskId::new();
        self.insert_queued(id).await;
        self.spawn(id, pipeline);
        id
    }

    /// Re-run `pipeline` under an existing id. Rejected while the previous
    /// run has not finished.
    pub async fn resubmit(&self, id: TaskId, pipeline: BatchPipeline) -> Result<()> {
        {
            let tasks = self.tasks.read().await;
            match tasks.get(&id) {
                None => return Err(PayshotError::TaskNotFound(id.to_string())),
                Some(status) if !status.state.is_finished() => {
                    return Err(PayshotError::TaskBusy(id.to_string()));
                }
                Some(_) => {}
            }
        }

        self.insert_queued(id).await;
        self.spawn(id, pipeline);
        Ok(())
    }

    pub async fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        self.tasks.read().await.get(id).cloned()
    }

    /// All tasks, oldest first.
    pub async fn list(&self) -> Vec<TaskStatus> {
        let mut tasks: Vec<TaskStatus> = self.tasks.read().await.values().cloned().collect();
        tasks.sort_by_key(|t| t.submitted_at);
        tasks
    }

    /// Drop a finished task from the store.
    pub async fn remove(&self, id: &TaskId) -> Result<TaskStatus> {
        let mut tasks = self.tasks.write().await;
        let finished = match tasks.get(id) {
            None => return Err(PayshotError::TaskNotFound(id.to_string())),
            Some(status) => status.state.is_finished(),
        };
        if !finished {
            return Err(PayshotError::TaskBusy(id.to_string()));
        }
        tasks
            .remove(id)
            .ok_or_else(|| PayshotError::TaskNotFound(id.to_string()))
    }

    /// Poll until the task finishes.
    pub async fn wait(&self, id: &TaskId, poll: Duration) -> Result<TaskStatus> {
        loop {
            match self.status(id).await {
                None => return Err(PayshotError::TaskNotFound(id.to_string())),
                Some(status) if status.state.is_finished() => return Ok(status),
                Some(_) => tokio::time::sleep(poll).await,
            }
        }
    }

    async fn insert_queued(&self, id: TaskId) {
        self.tasks.write().await.insert(
            id,
            TaskStatus {
                id,
                state: TaskState::Queued,
                submitted_at: Local::now(),
                finished_at: None,
            },
        );
    }

    async fn set_state(&self, id: TaskId, state: TaskState) {
        if let Some(status) = self.tasks.write().await.get_mut(&id) {
            if state.is_finished() {
                status.finished_at = Some(Local::now());
            }
            status.state = state;
        }
    }

    fn spawn(&self, id: TaskId, pipeline: BatchPipeline) {
        let registry = self.clone();
        tokio::spawn(async move {
            registry.set_state(id, TaskState::Running).await;
            info!("Task {} running on {}", id, pipeline.root().display());

            let state = match pipeline.run().await {
                Ok(report) => TaskState::Completed(report),
                Err(e) => {
                    warn!("Task {} failed: {}", id, e);
                    TaskState::Failed(e.to_string())
                }
            };
            info!("Task {} {}", id, state.label());
            registry.set_state(id, state).await;
        });
    }
}
