//! Crash recovery janitor
//!
//! A task `running` in the store whose worker died stops heartbeating.
//! The janitor sweeps periodically and transitions such tasks back to
//! `queued` (re-enqueueing the id) once the heartbeat is older than the
//! grace period. Redelivery is what makes the queue at-least-once.

use capstan_kernel::clock::Clock;
use capstan_kernel::store::{TaskFilter, TaskQueue, TaskStore};
use capstan_kernel::task::TaskStatus;
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Janitor tunables.
#[derive(Debug, Clone)]
pub struct JanitorConfig {
    /// How often to sweep.
    pub interval: Duration,
    /// Heartbeat age beyond which a running task counts as orphaned.
    pub grace: Duration,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            grace: Duration::from_secs(30),
        }
    }
}

/// Background sweeper for orphaned running tasks.
pub struct Janitor {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    clock: Arc<dyn Clock>,
    events: SharedEventSink,
    config: JanitorConfig,
}

impl Janitor {
    /// Create a janitor.
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        events: SharedEventSink,
        config: JanitorConfig,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            events,
            config,
        }
    }

    /// Spawn the sweep loop; cancel the token to stop it.
    pub fn start(self, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep().await {
                            warn!(%error, "janitor sweep failed");
                        }
                    }
                }
            }
        })
    }

    /// One sweep: requeue every orphaned running task.
    pub async fn sweep(&self) -> Result<usize, capstan_kernel::store::TaskError> {
        let running = self
            .store
            .list(TaskFilter {
                status: Some(TaskStatus::Running),
                task_type: None,
            })
            .await?;
        let now = self.clock.now();
        let mut requeued = 0;

        for task in running {
            let heartbeat = task.heartbeat_at.or(task.started_at);
            let orphaned = match heartbeat {
                Some(at) => {
                    let age = now.signed_duration_since(at);
                    age.num_milliseconds() >= 0
                        && age.num_milliseconds() as u128 > self.config.grace.as_millis()
                }
                // Running with no timestamps at all: claim write was
                // torn by a crash; reclaim immediately.
                None => true,
            };
            if !orphaned {
                continue;
            }

            let task_id = task.task_id;
            let mut reclaimed = false;
            let update = self
                .store
                .update(
                    task_id,
                    Box::new(|task| {
                        if task.status == TaskStatus::Running {
                            task.status = TaskStatus::Queued;
                            task.progress = None;
                            task.heartbeat_at = None;
                            reclaimed = true;
                        }
                    }),
                )
                .await;
            match update {
                Ok(_) if reclaimed => {
                    self.queue.enqueue(task_id).await?;
                    self.events.emit(ObservabilityEvent::TaskTransition {
                        task_id,
                        from: TaskStatus::Running.to_string(),
                        to: TaskStatus::Queued.to_string(),
                    });
                    info!(task_id = %task_id, "orphaned task requeued");
                    requeued += 1;
                }
                Ok(_) => {}
                Err(error) => warn!(task_id = %task_id, %error, "janitor reclaim failed"),
            }
        }
        Ok(requeued)
    }
}
