//! Capability client
//!
//! Invokes one capability on a discovered service: JSON body POSTed to
//! the service's invocation path, W3C trace headers injected, a
//! per-call timeout, and immediate cancellation. Failures come back as
//! a typed [`InvokeOutcome`] rather than an error — the executor and
//! analyzer need the status code and body shape, not a stack trace.

use capstan_kernel::service::{CapabilityDescriptor, ServiceDescriptor};
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use capstan_monitoring::propagator::{TRACEPARENT, TRACESTATE};
use capstan_monitoring::{to_trace_context, SpanContext};
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeOutcome {
    /// 2xx with a decoded payload (raw string when the body is not JSON).
    Success { status: u16, data: Value },
    /// Non-2xx; `body` is the decoded error payload when parseable.
    HttpError {
        status: u16,
        description: String,
        body: Option<Value>,
    },
    /// The per-call timeout elapsed.
    TimedOut { after: Duration },
    /// The caller's cancellation token fired.
    Cancelled,
    /// Connection-level failure (DNS, refused, reset).
    Transport { description: String },
}

impl InvokeOutcome {
    /// Whether the call produced a usable payload.
    pub fn is_success(&self) -> bool {
        matches!(self, InvokeOutcome::Success { .. })
    }

    /// The HTTP status, when the exchange got that far.
    pub fn status(&self) -> Option<u16> {
        match self {
            InvokeOutcome::Success { status, .. } | InvokeOutcome::HttpError { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Human-readable failure description (empty for success).
    pub fn describe(&self) -> String {
        match self {
            InvokeOutcome::Success { .. } => String::new(),
            InvokeOutcome::HttpError {
                status, description, ..
            } => format!("HTTP {status}: {description}"),
            InvokeOutcome::TimedOut { after } => {
                format!("call timed out after {}ms", after.as_millis())
            }
            InvokeOutcome::Cancelled => "cancelled".to_string(),
            InvokeOutcome::Transport { description } => format!("transport error: {description}"),
        }
    }
}

/// HTTP invoker for discovered capabilities.
pub struct CapabilityClient {
    http: reqwest::Client,
    default_timeout: Duration,
    events: SharedEventSink,
}

impl CapabilityClient {
    /// Create a client with the configured default call timeout.
    pub fn new(default_timeout: Duration, events: SharedEventSink) -> Self {
        Self {
            http: reqwest::Client::new(),
            default_timeout,
            events,
        }
    }

    /// Invoke `capability` on `service` with fully-resolved parameters.
    ///
    /// `trace` is injected as W3C headers when present. `timeout`
    /// overrides the default per-call budget. Cancellation interrupts
    /// any pending read immediately.
    pub async fn invoke(
        &self,
        step_id: &str,
        service: &ServiceDescriptor,
        capability: &CapabilityDescriptor,
        params: &Value,
        trace: Option<&SpanContext>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> InvokeOutcome {
        let url = format!(
            "{}{}",
            service.address.trim_end_matches('/'),
            capability.invocation_path
        );
        let budget = timeout.unwrap_or(self.default_timeout);
        let started = Instant::now();

        let mut request = self.http.post(&url).json(params);
        if let Some(ctx) = trace {
            let stored = to_trace_context(ctx);
            request = request.header(TRACEPARENT, stored.traceparent);
            if let Some(state) = stored.tracestate {
                request = request.header(TRACESTATE, state);
            }
        }

        debug!(step_id, url = %url, timeout_ms = budget.as_millis() as u64, "invoking capability");

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => InvokeOutcome::Cancelled,
            result = tokio::time::timeout(budget, request.send()) => match result {
                Err(_) => InvokeOutcome::TimedOut { after: budget },
                Ok(Err(error)) => InvokeOutcome::Transport {
                    description: error.to_string(),
                },
                Ok(Ok(response)) => Self::decode(response).await,
            },
        };

        self.events.emit(ObservabilityEvent::StepInvoke {
            step_id: step_id.to_string(),
            service_name: service.name.clone(),
            status_code: outcome.status(),
            success: outcome.is_success(),
            duration: started.elapsed(),
        });
        outcome
    }

    async fn decode(response: reqwest::Response) -> InvokeOutcome {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if (200..300).contains(&status) {
            let data = parsed.unwrap_or(Value::String(body));
            return InvokeOutcome::Success { status, data };
        }

        let description = parsed
            .as_ref()
            .and_then(extract_error_message)
            .unwrap_or_else(|| {
                if body.is_empty() {
                    format!("status {status} with empty body")
                } else {
                    body.clone()
                }
            });
        InvokeOutcome::HttpError {
            status,
            description,
            body: parsed,
        }
    }
}

/// Pull a human-readable message out of a structured error body.
fn extract_error_message(body: &Value) -> Option<String> {
    for key in ["error", "message", "detail", "description"] {
        match body.get(key) {
            Some(Value::String(s)) => return Some(s.clone()),
            Some(nested @ Value::Object(_)) => {
                if let Some(message) = extract_error_message(nested) {
                    return Some(message);
                }
            }
            _ => {}
        }
    }
    None
}
