//! Observability event contract
//!
//! Components emit typed [`ObservabilityEvent`]s through an injected
//! [`EventSink`]. The sink is passed into each component constructor
//! with [`NoopSink`] as the default — nothing in the core relies on a
//! process-global telemetry provider being initialised first. The
//! monitoring crate supplies the production sink.

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// A labelled event on the orchestration hot path.
///
/// Emission is append-only and concurrent-safe; sinks must not block.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ObservabilityEvent {
    /// The planner is about to call the oracle.
    PlanGenerationRequest {
        request_id: Uuid,
        attempt: u32,
        catalog_services: usize,
    },
    /// The planner's oracle call returned.
    PlanGenerationResponse {
        request_id: Uuid,
        attempt: u32,
        prompt_tokens: u32,
        completion_tokens: u32,
        provider: String,
        duration: Duration,
    },
    /// Layer-3 micro-resolution started for one field.
    MicroResolutionStart { step_id: String, field: String },
    /// Layer-3 micro-resolution finished for one field.
    MicroResolutionComplete {
        step_id: String,
        field: String,
        resolved: bool,
        duration: Duration,
    },
    /// Layer-4 contextual re-resolution started.
    ContextualReResolutionStart { step_id: String, attempt: u32 },
    /// Layer-4 contextual re-resolution finished.
    ContextualReResolutionComplete {
        step_id: String,
        attempt: u32,
        should_retry: bool,
        duration: Duration,
    },
    /// One capability invocation finished (success or failure).
    StepInvoke {
        step_id: String,
        service_name: String,
        status_code: Option<u16>,
        success: bool,
        duration: Duration,
    },
    /// A step reached a terminal result (after all recovery).
    StepComplete {
        step_id: String,
        service_name: String,
        success: bool,
        duration: Duration,
    },
    /// A task changed lifecycle state.
    TaskTransition {
        task_id: Uuid,
        from: String,
        to: String,
    },
}

impl ObservabilityEvent {
    /// Stable event label, dotted like the metric it backs.
    pub fn label(&self) -> &'static str {
        match self {
            ObservabilityEvent::PlanGenerationRequest { .. } => "plan_generation.request",
            ObservabilityEvent::PlanGenerationResponse { .. } => "plan_generation.response",
            ObservabilityEvent::MicroResolutionStart { .. } => "micro_resolution.start",
            ObservabilityEvent::MicroResolutionComplete { .. } => "micro_resolution.complete",
            ObservabilityEvent::ContextualReResolutionStart { .. } => {
                "contextual_re_resolution.start"
            }
            ObservabilityEvent::ContextualReResolutionComplete { .. } => {
                "contextual_re_resolution.complete"
            }
            ObservabilityEvent::StepInvoke { .. } => "step.invoke",
            ObservabilityEvent::StepComplete { .. } => "step.complete",
            ObservabilityEvent::TaskTransition { .. } => "task.transition",
        }
    }
}

/// Where observability events go.
pub trait EventSink: Send + Sync {
    /// Record one event. Must not block.
    fn emit(&self, event: ObservabilityEvent);
}

/// Shared handle to an event sink.
pub type SharedEventSink = Arc<dyn EventSink>;

/// Discards every event; the constructor-injection default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl EventSink for NoopSink {
    fn emit(&self, _event: ObservabilityEvent) {}
}

/// A sink that records events in memory, for tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: std::sync::Mutex<Vec<ObservabilityEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the labels recorded so far, in emission order.
    pub fn labels(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .expect("recording sink poisoned")
            .iter()
            .map(ObservabilityEvent::label)
            .collect()
    }

    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<ObservabilityEvent> {
        self.events.lock().expect("recording sink poisoned").clone()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: ObservabilityEvent) {
        self.events
            .lock()
            .expect("recording sink poisoned")
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let event = ObservabilityEvent::ContextualReResolutionComplete {
            step_id: "step-3-convert".into(),
            attempt: 1,
            should_retry: true,
            duration: Duration::from_millis(42),
        };
        assert_eq!(event.label(), "contextual_re_resolution.complete");
    }

    #[test]
    fn recording_sink_preserves_order() {
        let sink = RecordingSink::new();
        sink.emit(ObservabilityEvent::MicroResolutionStart {
            step_id: "s".into(),
            field: "country".into(),
        });
        sink.emit(ObservabilityEvent::MicroResolutionComplete {
            step_id: "s".into(),
            field: "country".into(),
            resolved: true,
            duration: Duration::ZERO,
        });
        assert_eq!(
            sink.labels(),
            vec!["micro_resolution.start", "micro_resolution.complete"]
        );
    }
}
