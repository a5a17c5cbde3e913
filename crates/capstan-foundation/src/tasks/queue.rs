//! In-memory task queue
//!
//! FIFO queue of task ids with a bounded blocking dequeue. Delivery is
//! at-least-once: the janitor re-enqueues tasks whose worker died, so a
//! consumer may see an id twice and must claim through the store's
//! atomic update before doing work.

use async_trait::async_trait;
use capstan_kernel::store::{TaskQueue, TaskResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

/// [`TaskQueue`] backed by a mutex-guarded deque and a notifier.
#[derive(Default)]
pub struct MemoryTaskQueue {
    queue: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl MemoryTaskQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(&self, id: Uuid) -> TaskResult<()> {
        self.queue.lock().push_back(id);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> TaskResult<Option<Uuid>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(id) = self.queue.lock().pop_front() {
                return Ok(Some(id));
            }
            // Wait for a producer, re-checking on wakeup: notify_one
            // races with a competing consumer taking the element first.
            match tokio::time::timeout_at(deadline, self.notify.notified()).await {
                Ok(()) => continue,
                Err(_) => return Ok(None),
            }
        }
    }

    async fn depth(&self) -> usize {
        self.queue.lock().len()
    }
}
