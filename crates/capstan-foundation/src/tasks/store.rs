//! In-memory task store
//!
//! DashMap-backed record of every task. Entry-level locking makes
//! [`TaskStore::update`] atomic per task: the mutator runs under the
//! shard's exclusive guard, so two workers can never interleave on one
//! record.

use async_trait::async_trait;
use capstan_kernel::store::{TaskError, TaskFilter, TaskMutator, TaskResult, TaskStore};
use capstan_kernel::task::Task;
use dashmap::DashMap;
use uuid::Uuid;

/// [`TaskStore`] backed by a concurrent map.
#[derive(Default)]
pub struct MemoryTaskStore {
    tasks: DashMap<Uuid, Task>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn put(&self, task: Task) -> TaskResult<()> {
        self.tasks.insert(task.task_id, task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> TaskResult<Option<Task>> {
        Ok(self.tasks.get(&id).map(|entry| entry.clone()))
    }

    async fn update(&self, id: Uuid, mutator: TaskMutator<'_>) -> TaskResult<Task> {
        let mut entry = self.tasks.get_mut(&id).ok_or(TaskError::NotFound(id))?;
        mutator(entry.value_mut());
        Ok(entry.clone())
    }

    async fn list(&self, filter: TaskFilter) -> TaskResult<Vec<Task>> {
        let mut out: Vec<Task> = self
            .tasks
            .iter()
            .filter(|entry| {
                filter
                    .status
                    .map(|status| entry.status == status)
                    .unwrap_or(true)
                    && filter
                        .task_type
                        .as_deref()
                        .map(|t| entry.task_type == t)
                        .unwrap_or(true)
            })
            .map(|entry| entry.clone())
            .collect();
        out.sort_by_key(|task| task.created_at);
        Ok(out)
    }
}
