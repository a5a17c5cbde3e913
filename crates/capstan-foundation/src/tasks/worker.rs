//! Worker pool
//!
//! N workers loop over the queue: dequeue with a bounded wait, claim
//! the task with an atomic queued → running transition (skipping tasks
//! cancelled in the meantime), continue the submission trace as a
//! **linked** span, dispatch to the registered handler with a progress
//! sink, and record the terminal transition. A heartbeat task refreshes
//! the record every few seconds so the janitor can detect dead workers,
//! and doubles as the poll that notices store-side cancellation.
//!
//! Graceful shutdown stops dequeuing, drains in-flight tasks up to the
//! shutdown budget, then force-cancels.

use capstan_kernel::clock::Clock;
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::store::{ProgressSink, TaskHandler, TaskQueue, TaskStore};
use capstan_kernel::task::{Task, TaskProgress, TaskStatus};
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use capstan_monitoring::worker_root_span;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Worker pool tunables (one slice of the runtime config).
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of workers.
    pub worker_count: usize,
    /// Bounded blocking wait per dequeue.
    pub dequeue_wait: Duration,
    /// Heartbeat/cancellation-poll interval.
    pub heartbeat_interval: Duration,
    /// Per-task handler timeout.
    pub handler_timeout: Duration,
    /// In-flight drain budget on shutdown.
    pub shutdown_budget: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            worker_count: 3,
            dequeue_wait: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(5),
            handler_timeout: Duration::from_secs(600),
            shutdown_budget: Duration::from_secs(60),
        }
    }
}

/// Progress sink that writes through the store onto the task record.
struct StoreProgressSink {
    store: Arc<dyn TaskStore>,
    task_id: Uuid,
}

#[async_trait::async_trait]
impl ProgressSink for StoreProgressSink {
    async fn report(&self, progress: TaskProgress) {
        let result = self
            .store
            .update(
                self.task_id,
                Box::new(move |task| {
                    if task.status == TaskStatus::Running {
                        task.progress = Some(progress);
                    }
                }),
            )
            .await;
        if let Err(error) = result {
            warn!(task_id = %self.task_id, %error, "progress update failed");
        }
    }
}

/// The worker pool.
pub struct WorkerPool {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    clock: Arc<dyn Clock>,
    events: SharedEventSink,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Create a pool; register handlers before starting.
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn TaskQueue>,
        clock: Arc<dyn Clock>,
        events: SharedEventSink,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            queue,
            handlers: HashMap::new(),
            clock,
            events,
            config,
        }
    }

    /// Register the handler for one `task.type`.
    pub fn register_handler(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers
            .insert(handler.task_type().to_string(), handler);
    }

    /// Spawn the workers; the returned handle drives shutdown.
    pub fn start(self) -> WorkerPoolHandle {
        let pool = Arc::new(self);
        let stop = CancellationToken::new();
        let force = CancellationToken::new();
        let mut handles = Vec::with_capacity(pool.config.worker_count);
        for worker_id in 0..pool.config.worker_count {
            let pool = Arc::clone(&pool);
            let stop = stop.clone();
            let force = force.clone();
            handles.push(tokio::spawn(async move {
                pool.worker_loop(worker_id, stop, force).await;
            }));
        }
        info!(workers = handles.len(), "worker pool started");
        WorkerPoolHandle {
            stop,
            force,
            handles,
            shutdown_budget: pool.config.shutdown_budget,
        }
    }

    async fn worker_loop(&self, worker_id: usize, stop: CancellationToken, force: CancellationToken) {
        loop {
            if stop.is_cancelled() {
                break;
            }
            let dequeued = tokio::select! {
                _ = stop.cancelled() => break,
                dequeued = self.queue.dequeue(self.config.dequeue_wait) => dequeued,
            };
            let task_id = match dequeued {
                Ok(Some(id)) => id,
                Ok(None) => continue,
                Err(error) => {
                    warn!(worker_id, %error, "dequeue failed; backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };
            self.run_one(worker_id, task_id, &force).await;
        }
        debug!(worker_id, "worker stopped");
    }

    async fn run_one(&self, worker_id: usize, task_id: Uuid, force: &CancellationToken) {
        let now = self.clock.now();
        let mut claimed = false;
        let claim = self
            .store
            .update(
                task_id,
                Box::new(|task| {
                    if task.status == TaskStatus::Queued {
                        task.mark_running(now);
                        claimed = true;
                    }
                }),
            )
            .await;
        let task = match claim {
            Ok(task) if claimed => task,
            Ok(task) => {
                debug!(task_id = %task_id, status = %task.status, "skipping unclaimable task");
                return;
            }
            Err(error) => {
                warn!(task_id = %task_id, %error, "claim failed");
                return;
            }
        };
        self.emit_transition(task_id, TaskStatus::Queued, TaskStatus::Running);

        // The submission trace closed at the 202; the work trace is a
        // new root with a FOLLOWS_FROM link, never a child.
        let span = worker_root_span(task_id, &task.task_type, task.trace_context.as_ref());
        self.execute_claimed(worker_id, task, force)
            .instrument(span)
            .await;
    }

    async fn execute_claimed(&self, worker_id: usize, task: Task, force: &CancellationToken) {
        let task_id = task.task_id;
        let cancel = force.child_token();

        // Heartbeat + store-side cancellation poll.
        let heartbeat = {
            let store = Arc::clone(&self.store);
            let clock = Arc::clone(&self.clock);
            let cancel = cancel.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let now = clock.now();
                    match store
                        .update(task_id, Box::new(move |task| {
                            if task.status == TaskStatus::Running {
                                task.heartbeat_at = Some(now);
                            }
                        }))
                        .await
                    {
                        Ok(task) if task.status == TaskStatus::Cancelled => {
                            cancel.cancel();
                            break;
                        }
                        Ok(_) => {}
                        Err(_) => break,
                    }
                }
            })
        };

        let outcome = match self.handlers.get(&task.task_type) {
            Some(handler) => {
                let progress = StoreProgressSink {
                    store: Arc::clone(&self.store),
                    task_id,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(OrchestratorError::Cancelled("task cancelled".into())),
                    result = tokio::time::timeout(
                        self.config.handler_timeout,
                        handler.handle(&task, &progress, cancel.clone()),
                    ) => match result {
                        Ok(inner) => inner,
                        Err(_) => Err(OrchestratorError::Timeout {
                            scope: format!("task {task_id}"),
                            elapsed_ms: self.config.handler_timeout.as_millis() as u64,
                        }),
                    },
                }
            }
            None => Err(OrchestratorError::InvalidInput(format!(
                "no handler registered for task type '{}'",
                task.task_type
            ))),
        };

        heartbeat.abort();
        let now = self.clock.now();
        let terminal = match &outcome {
            Ok(_) => TaskStatus::Completed,
            Err(OrchestratorError::Cancelled(_)) => TaskStatus::Cancelled,
            Err(_) => TaskStatus::Failed,
        };
        let update = self
            .store
            .update(
                task_id,
                Box::new(move |task| {
                    if task.status != TaskStatus::Running {
                        return; // cancelled (or janitor-reclaimed) under us
                    }
                    match outcome {
                        Ok(result) => task.mark_completed(result, now),
                        Err(OrchestratorError::Cancelled(_)) => task.mark_cancelled(now),
                        Err(error) => task.mark_failed(error.to_string(), now),
                    }
                }),
            )
            .await;
        match update {
            Ok(task) if task.status == terminal => {
                self.emit_transition(task_id, TaskStatus::Running, terminal);
                debug!(worker_id, task_id = %task_id, status = %terminal, "task finished");
            }
            Ok(task) => {
                debug!(worker_id, task_id = %task_id, status = %task.status, "terminal write lost to concurrent transition");
            }
            Err(error) => warn!(task_id = %task_id, %error, "terminal update failed"),
        }
    }

    fn emit_transition(&self, task_id: Uuid, from: TaskStatus, to: TaskStatus) {
        self.events.emit(ObservabilityEvent::TaskTransition {
            task_id,
            from: from.to_string(),
            to: to.to_string(),
        });
    }
}

/// Handle for shutting the pool down.
pub struct WorkerPoolHandle {
    stop: CancellationToken,
    force: CancellationToken,
    handles: Vec<tokio::task::JoinHandle<()>>,
    shutdown_budget: Duration,
}

impl WorkerPoolHandle {
    /// Stop dequeuing, drain in-flight work up to the budget, then
    /// force-cancel whatever is left.
    pub async fn shutdown(self) {
        info!("worker pool shutting down");
        self.stop.cancel();
        let drain = async {
            for handle in self.handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(self.shutdown_budget, drain).await.is_err() {
            warn!("shutdown budget exceeded; force-cancelling in-flight tasks");
            self.force.cancel();
        }
    }
}
