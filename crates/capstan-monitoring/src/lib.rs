//! # Capstan Monitoring
//!
//! Trace plumbing for the orchestration runtime:
//!
//! - [`context`] — the W3C-shaped trace/span id model;
//! - [`propagator`] — `traceparent`/`tracestate` parsing, formatting,
//!   and carrier injection;
//! - [`linked`] — worker root spans with FOLLOWS_FROM links across the
//!   task-queue boundary;
//! - [`exporter`] — tracing-subscriber bootstrap with optional OTLP
//!   span export;
//! - [`sink`] — the production [`capstan_kernel::telemetry::EventSink`];
//! - [`capture`] — the TTL-bounded LLM prompt/response debug store.

pub mod capture;
pub mod context;
pub mod exporter;
pub mod linked;
pub mod propagator;
pub mod sink;

pub use capture::{CapturedCall, LlmDebugCapture};
pub use context::{SpanContext, SpanId, TraceFlags, TraceId};
pub use exporter::{init_telemetry, ExporterError, TelemetryGuard};
pub use linked::{to_otel_context, worker_root_span};
pub use propagator::{
    from_trace_context, to_trace_context, HeaderCarrier, W3cPropagator, TRACEPARENT, TRACESTATE,
};
pub use sink::TracingEventSink;
