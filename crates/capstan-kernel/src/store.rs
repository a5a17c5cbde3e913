//! Task store, queue, and handler contracts
//!
//! Trait definitions only; the in-memory implementations live in the
//! foundation crate. The kernel never depends on foundation.

use crate::error::OrchestratorError;
use crate::task::{Task, TaskProgress, TaskStatus};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Store/queue failure modes.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// No task with the given id.
    #[error("task '{0}' not found")]
    NotFound(Uuid),

    /// An update conflicted with the task's current state.
    #[error("task '{task_id}' is {status}; {reason}")]
    InvalidTransition {
        task_id: Uuid,
        status: TaskStatus,
        reason: String,
    },

    /// The store or queue backend is unavailable.
    #[error("task backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store/queue operations.
pub type TaskResult<T> = Result<T, TaskError>;

/// Filter for [`TaskStore::list`].
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    /// Restrict to one status.
    pub status: Option<TaskStatus>,
    /// Restrict to one handler type.
    pub task_type: Option<String>,
}

/// Mutator applied atomically to one task record.
pub type TaskMutator<'a> = Box<dyn FnOnce(&mut Task) + Send + 'a>;

/// Durable record of every task.
///
/// All mutations of one task go through [`update`](TaskStore::update),
/// which the implementation must make atomic (compare-and-set or a
/// per-task lock).
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task record.
    async fn put(&self, task: Task) -> TaskResult<()>;

    /// Fetch a task by id.
    async fn get(&self, id: Uuid) -> TaskResult<Option<Task>>;

    /// Atomically mutate a task, returning the updated record.
    async fn update(&self, id: Uuid, mutator: TaskMutator<'_>) -> TaskResult<Task>;

    /// All tasks matching the filter.
    async fn list(&self, filter: TaskFilter) -> TaskResult<Vec<Task>>;
}

/// FIFO queue of task ids with at-least-once delivery.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Append a task id.
    async fn enqueue(&self, id: Uuid) -> TaskResult<()>;

    /// Pop the oldest task id, waiting up to `timeout` for one to
    /// arrive. `None` means the wait elapsed.
    async fn dequeue(&self, timeout: Duration) -> TaskResult<Option<Uuid>>;

    /// Current queue depth (for health reporting).
    async fn depth(&self) -> usize;
}

/// Where a handler reports progress.
///
/// The worker wires this to the task store so progress lands on the
/// task record; tests substitute a recording sink.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Record the latest progress snapshot.
    async fn report(&self, progress: TaskProgress);
}

/// Executes tasks of one registered type.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The `task.type` value this handler serves.
    fn task_type(&self) -> &str;

    /// Run the task to completion, reporting progress along the way.
    ///
    /// Implementations must observe `cancel` at every suspension point;
    /// a cancelled handler should return [`OrchestratorError::Cancelled`].
    async fn handle(
        &self,
        task: &Task,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, OrchestratorError>;
}
