//! Asynchronous task entity
//!
//! A [`Task`] is one unit of durable asynchronous work. The store owns
//! the persisted record; only the assigned worker mutates a running
//! task's progress. The submission-time trace context travels with the
//! task so the worker can link its own trace back to the API trace.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Persisted and waiting in the queue.
    Queued,
    /// Claimed by a worker.
    Running,
    /// Finished with a result.
    Completed,
    /// Finished with an error.
    Failed,
    /// Cancelled before completion.
    Cancelled,
}

impl TaskStatus {
    /// Whether the status admits no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Progress of a running task, written through the store by its worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    /// 1-based index of the step currently executing.
    pub current_step: u32,
    /// Total number of steps in the plan.
    pub total_steps: u32,
    /// Name of the step currently executing.
    pub step_name: String,
    /// Completion percentage in `[0, 100]`.
    pub percentage: f64,
    /// Optional free-text status line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskProgress {
    /// Progress record for step `current` of `total`.
    pub fn at_step(current: u32, total: u32, step_name: impl Into<String>) -> Self {
        let percentage = if total == 0 {
            100.0
        } else {
            (current as f64 / total as f64) * 100.0
        };
        Self {
            current_step: current,
            total_steps: total,
            step_name: step_name.into(),
            percentage,
            message: None,
        }
    }

    /// Attach a status line.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// The W3C trace context captured at task submission.
///
/// Stored as the raw header values; the monitoring crate parses them
/// when the worker starts its linked span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// `traceparent` header value.
    pub traceparent: String,
    /// `tracestate` header value, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracestate: Option<String>,
}

/// One unit of durable asynchronous work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task id.
    pub task_id: Uuid,
    /// Selects the registered handler.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Opaque handler input.
    pub input: serde_json::Value,
    /// Current lifecycle state.
    pub status: TaskStatus,
    /// Progress record (present once running).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    /// Handler output on completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure diagnosis on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Trace context captured at submission, for FOLLOWS_FROM linkage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_context: Option<TraceContext>,
    /// Submission instant.
    pub created_at: DateTime<Utc>,
    /// Set on the queued → running transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Set on any terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Refreshed by the owning worker; the janitor uses it to detect
    /// workers that died mid-task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl Task {
    /// Create a queued task.
    pub fn new(task_type: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            task_type: task_type.into(),
            input,
            status: TaskStatus::Queued,
            progress: None,
            result: None,
            error: None,
            trace_context: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            heartbeat_at: None,
        }
    }

    /// Attach the submission trace context.
    pub fn with_trace_context(mut self, ctx: TraceContext) -> Self {
        self.trace_context = Some(ctx);
        self
    }

    /// Transition to running, stamping `started_at` and the heartbeat.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
    }

    /// Transition to completed with the handler output.
    pub fn mark_completed(&mut self, result: serde_json::Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.result = Some(result);
        self.completed_at = Some(now);
    }

    /// Transition to failed with a diagnosis.
    pub fn mark_failed(&mut self, error: impl Into<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }

    /// Transition to cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.completed_at = Some(now);
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn lifecycle_transitions_stamp_timestamps() {
        let mut task = Task::new("orchestrate", json!({"request": "hi"}));
        assert_eq!(task.status, TaskStatus::Queued);
        assert!(task.started_at.is_none());

        let now = Utc::now();
        task.mark_running(now);
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.started_at, Some(now));
        assert_eq!(task.heartbeat_at, Some(now));

        task.mark_completed(json!({"ok": true}), now);
        assert!(task.is_terminal());
        assert_eq!(task.completed_at, Some(now));
    }

    #[test]
    fn terminal_statuses_are_terminal() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn progress_percentage_tracks_step_fraction() {
        let progress = TaskProgress::at_step(1, 4, "geocode");
        assert!((progress.percentage - 25.0).abs() < f64::EPSILON);
        let done = TaskProgress::at_step(0, 0, "empty");
        assert_eq!(done.percentage, 100.0);
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = Task::new("orchestrate", json!({"request": "weather"}))
            .with_trace_context(TraceContext {
                traceparent: "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".into(),
                tracestate: None,
            });
        let encoded = serde_json::to_string(&task).unwrap();
        let decoded: Task = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.task_type, "orchestrate");
        assert_eq!(decoded.status, TaskStatus::Queued);
        assert!(decoded.trace_context.is_some());
    }
}
