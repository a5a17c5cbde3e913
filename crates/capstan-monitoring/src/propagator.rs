//! W3C Trace Context propagation
//!
//! Implements the `traceparent`/`tracestate` header format. The
//! [`HeaderCarrier`] abstraction decouples the propagator from any one
//! header map type; the kernel's [`TraceContext`] record (raw header
//! strings stored on a task) converts in both directions.

use crate::context::{SpanContext, SpanId, TraceFlags, TraceId};
use capstan_kernel::task::TraceContext;
use std::collections::HashMap;

/// `traceparent` header name.
pub const TRACEPARENT: &str = "traceparent";
/// `tracestate` header name.
pub const TRACESTATE: &str = "tracestate";
/// Supported traceparent version.
pub const VERSION: &str = "00";

/// Abstraction over a header map for propagation.
pub trait HeaderCarrier {
    /// Get a header value.
    fn get(&self, key: &str) -> Option<&str>;
    /// Set a header value.
    fn set(&mut self, key: &str, value: String);
}

impl HeaderCarrier for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<&str> {
        self.get(key).map(String::as_str)
    }

    fn set(&mut self, key: &str, value: String) {
        self.insert(key.to_string(), value);
    }
}

/// W3C Trace Context propagator.
#[derive(Debug, Clone, Copy, Default)]
pub struct W3cPropagator;

impl W3cPropagator {
    /// Create a propagator.
    pub fn new() -> Self {
        Self
    }

    /// Parse a `traceparent` value into its parts.
    ///
    /// Higher versions than `00` are accepted; only the known fields
    /// are interpreted.
    pub fn parse_traceparent(value: &str) -> Option<(TraceId, SpanId, TraceFlags)> {
        let parts: Vec<&str> = value.split('-').collect();
        if parts.len() < 4 || parts[0].len() != 2 {
            return None;
        }
        let trace_id = TraceId::from_hex(parts[1]).ok()?;
        let span_id = SpanId::from_hex(parts[2]).ok()?;
        let flags = u8::from_str_radix(parts[3], 16).ok()?;
        Some((trace_id, span_id, TraceFlags::new(flags)))
    }

    /// Format a `traceparent` value.
    pub fn format_traceparent(ctx: &SpanContext) -> String {
        format!(
            "{}-{}-{}-{:02x}",
            VERSION,
            ctx.trace_id.to_hex(),
            ctx.span_id.to_hex(),
            ctx.trace_flags.as_u8()
        )
    }

    /// Extract a remote span context from a carrier.
    pub fn extract(&self, carrier: &dyn HeaderCarrier) -> Option<SpanContext> {
        let traceparent = carrier.get(TRACEPARENT)?;
        let (trace_id, span_id, flags) = Self::parse_traceparent(traceparent)?;
        if !trace_id.is_valid() || !span_id.is_valid() {
            return None;
        }
        let state = carrier.get(TRACESTATE).map(str::to_string);
        Some(SpanContext::new(trace_id, span_id, flags, true).with_trace_state(state))
    }

    /// Inject a span context into a carrier.
    pub fn inject(&self, ctx: &SpanContext, carrier: &mut dyn HeaderCarrier) {
        if !ctx.is_valid() {
            return;
        }
        carrier.set(TRACEPARENT, Self::format_traceparent(ctx));
        if let Some(state) = &ctx.trace_state {
            if !state.is_empty() {
                carrier.set(TRACESTATE, state.clone());
            }
        }
    }
}

/// Render a span context as the kernel's stored [`TraceContext`].
pub fn to_trace_context(ctx: &SpanContext) -> TraceContext {
    TraceContext {
        traceparent: W3cPropagator::format_traceparent(ctx),
        tracestate: ctx.trace_state.clone(),
    }
}

/// Parse a stored [`TraceContext`] back into a span context.
pub fn from_trace_context(stored: &TraceContext) -> Option<SpanContext> {
    let (trace_id, span_id, flags) = W3cPropagator::parse_traceparent(&stored.traceparent)?;
    if !trace_id.is_valid() || !span_id.is_valid() {
        return None;
    }
    Some(
        SpanContext::new(trace_id, span_id, flags, true)
            .with_trace_state(stored.tracestate.clone()),
    )
}
