//! Tracing-backed event sink
//!
//! Renders kernel [`ObservabilityEvent`]s as structured `tracing`
//! events so they reach both logs and any installed span-export layer.
//! Injected into components at construction; the kernel's `NoopSink`
//! remains the default when no telemetry is wanted.

use capstan_kernel::telemetry::{EventSink, ObservabilityEvent};

/// [`EventSink`] that forwards every event to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl TracingEventSink {
    /// Create a sink.
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for TracingEventSink {
    fn emit(&self, event: ObservabilityEvent) {
        let label = event.label();
        match event {
            ObservabilityEvent::PlanGenerationRequest {
                request_id,
                attempt,
                catalog_services,
            } => {
                tracing::info!(
                    event = label,
                    request_id = %request_id,
                    attempt,
                    catalog_services,
                    "planner calling oracle"
                );
            }
            ObservabilityEvent::PlanGenerationResponse {
                request_id,
                attempt,
                prompt_tokens,
                completion_tokens,
                provider,
                duration,
            } => {
                tracing::info!(
                    event = label,
                    request_id = %request_id,
                    attempt,
                    prompt_tokens,
                    completion_tokens,
                    provider = %provider,
                    duration_ms = duration.as_millis() as u64,
                    "planner oracle call returned"
                );
            }
            ObservabilityEvent::MicroResolutionStart { step_id, field } => {
                tracing::debug!(event = label, step_id = %step_id, field = %field, "layer-3 start");
            }
            ObservabilityEvent::MicroResolutionComplete {
                step_id,
                field,
                resolved,
                duration,
            } => {
                tracing::info!(
                    event = label,
                    step_id = %step_id,
                    field = %field,
                    resolved,
                    duration_ms = duration.as_millis() as u64,
                    "layer-3 complete"
                );
            }
            ObservabilityEvent::ContextualReResolutionStart { step_id, attempt } => {
                tracing::debug!(event = label, step_id = %step_id, attempt, "layer-4 start");
            }
            ObservabilityEvent::ContextualReResolutionComplete {
                step_id,
                attempt,
                should_retry,
                duration,
            } => {
                tracing::info!(
                    event = label,
                    step_id = %step_id,
                    attempt,
                    should_retry,
                    duration_ms = duration.as_millis() as u64,
                    "layer-4 complete"
                );
            }
            ObservabilityEvent::StepInvoke {
                step_id,
                service_name,
                status_code,
                success,
                duration,
            } => {
                tracing::info!(
                    event = label,
                    step_id = %step_id,
                    service = %service_name,
                    status = status_code,
                    success,
                    duration_ms = duration.as_millis() as u64,
                    "capability invoked"
                );
            }
            ObservabilityEvent::StepComplete {
                step_id,
                service_name,
                success,
                duration,
            } => {
                tracing::info!(
                    event = label,
                    step_id = %step_id,
                    service = %service_name,
                    success,
                    duration_ms = duration.as_millis() as u64,
                    "step complete"
                );
            }
            ObservabilityEvent::TaskTransition { task_id, from, to } => {
                tracing::info!(
                    event = label,
                    task_id = %task_id,
                    from = %from,
                    to = %to,
                    "task transition"
                );
            }
            _ => {}
        }
    }
}
