//! Linked spans across the queue boundary
//!
//! The API-side span closes at the HTTP 202 response; the worker's root
//! span must be a **new trace** that carries a FOLLOWS_FROM link back to
//! the submission context, never a parent-child edge. OpenTelemetry
//! models follows-from as a span link, so the helper here starts a
//! fresh root span and attaches the stored submission context as a
//! link.

use crate::context::SpanContext;
use crate::propagator::from_trace_context;
use capstan_kernel::task::TraceContext;
use opentelemetry::trace::{
    SpanContext as OtelSpanContext, SpanId as OtelSpanId, TraceFlags as OtelTraceFlags,
    TraceId as OtelTraceId, TraceState as OtelTraceState,
};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;
use uuid::Uuid;

/// Convert the local context model into the OpenTelemetry API type.
pub fn to_otel_context(ctx: &SpanContext) -> OtelSpanContext {
    let flags = if ctx.is_sampled() {
        OtelTraceFlags::SAMPLED
    } else {
        OtelTraceFlags::default()
    };
    let state = ctx
        .trace_state
        .as_deref()
        .and_then(|raw| raw.parse::<OtelTraceState>().ok())
        .unwrap_or_else(OtelTraceState::default);
    OtelSpanContext::new(
        OtelTraceId::from_bytes(ctx.trace_id.0),
        OtelSpanId::from_bytes(ctx.span_id.0),
        flags,
        ctx.is_remote,
        state,
    )
}

/// Start the worker-side root span for one task execution.
///
/// When the task carries a submission [`TraceContext`], the new span is
/// linked (follows-from) to it; otherwise it is a plain root span.
pub fn worker_root_span(
    task_id: Uuid,
    task_type: &str,
    submission: Option<&TraceContext>,
) -> Span {
    let span = tracing::info_span!(
        "task.execute",
        task.id = %task_id,
        task.r#type = %task_type,
        linked = submission.is_some(),
    );
    if let Some(stored) = submission {
        if let Some(ctx) = from_trace_context(stored) {
            span.add_link(to_otel_context(&ctx));
        }
    }
    span
}
