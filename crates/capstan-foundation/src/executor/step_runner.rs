//! Per-step execution with the four-layer recovery pipeline
//!
//! One [`StepRunner`] owns everything a step needs to run to a terminal
//! [`StepResult`]: resolve parameters (Layers 1+2, escalating to 3),
//! invoke the capability, and on failure let the analyzer pick the
//! recovery path — mechanical backoff, Layer-3 field repair, or Layer-4
//! contextual re-resolution — until success or budget exhaustion.

use crate::analyzer::{ErrorAnalyzer, FailureClass};
use crate::capability::{CapabilityClient, InvokeOutcome};
use crate::catalog::ServiceCatalog;
use crate::llm::OracleSession;
use crate::resolver::{FieldIssue, ParameterResolver, ResolutionScope};
use capstan_kernel::plan::Step;
use capstan_kernel::result::StepResult;
use capstan_kernel::service::SemanticType;
use capstan_monitoring::{SpanContext, SpanId};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Everything one step needs to execute, cloned out of the executor so
/// the spawned task is `'static`.
pub struct StepRunner {
    pub step: Step,
    pub catalog: Arc<ServiceCatalog>,
    pub client: Arc<CapabilityClient>,
    pub resolver: Arc<ParameterResolver>,
    pub analyzer: ErrorAnalyzer,
    pub oracle: Arc<OracleSession>,
    pub request_values: HashMap<String, Value>,
    pub step_results: HashMap<String, StepResult>,
    pub original_request: String,
    /// Plan-level trace context; each invocation sends the same trace
    /// id with a fresh span id.
    pub trace: SpanContext,
    pub step_timeout: Duration,
    pub call_timeout: Duration,
    pub mechanical_max_attempts: u32,
    pub param_repair_max_attempts: u32,
}

impl StepRunner {
    /// Run the step to a terminal result, honouring the step timeout.
    pub async fn run(self, cancel: CancellationToken) -> StepResult {
        let started = Instant::now();
        let step_id = self.step.step_id.clone();
        let service_name = self.step.service_name.clone();
        let timeout = self
            .step
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.step_timeout);

        if cancel.is_cancelled() {
            return StepResult::failure(step_id, service_name, "cancelled before start", started.elapsed());
        }

        match tokio::time::timeout(timeout, self.run_inner(&cancel, started)).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                StepResult::failure(
                    step_id,
                    service_name,
                    format!("step timed out after {}ms", timeout.as_millis()),
                    started.elapsed(),
                )
            }
        }
    }

    async fn run_inner(&self, cancel: &CancellationToken, started: Instant) -> StepResult {
        let step_id = &self.step.step_id;

        let Some((service, capability)) = self
            .catalog
            .find_capability(&self.step.service_name, &self.step.capability_name)
        else {
            return StepResult::failure(
                step_id,
                &self.step.service_name,
                format!(
                    "capability '{}.{}' is not available in the catalog",
                    self.step.service_name, self.step.capability_name
                ),
                started.elapsed(),
            );
        };

        let scope = ResolutionScope {
            request_values: &self.request_values,
            step_results: &self.step_results,
        };

        // Layers 1+2, escalating to Layer 3 on field issues.
        let mut params: Map<String, Value> =
            match self.resolver.resolve(&self.step, &capability, &scope) {
                Ok(params) => params,
                Err(issues) => {
                    debug!(
                        step_id = %step_id,
                        issues = issues.len(),
                        "layer-2 rejected parameters; escalating to layer 3"
                    );
                    match self
                        .resolver
                        .micro_resolve(
                            &self.oracle,
                            &self.step,
                            &capability,
                            &issues,
                            &scope,
                            &self.original_request,
                        )
                        .await
                    {
                        Ok(params) => params,
                        Err(error) => {
                            return StepResult::failure(
                                step_id,
                                &self.step.service_name,
                                error.to_string(),
                                started.elapsed(),
                            );
                        }
                    }
                }
            };

        let mut retry_count: u32 = 0;
        let mut mechanical_attempts: u32 = 0;
        let mut repair_attempts: u32 = 0;
        let mut semantic_attempts: u32 = 0;
        let mut signatures: Vec<String> = Vec::new();
        let mut last_status: Option<u16> = None;

        loop {
            if cancel.is_cancelled() {
                return StepResult::failure(
                    step_id,
                    &self.step.service_name,
                    "cancelled",
                    started.elapsed(),
                )
                .with_retries(retry_count);
            }

            let call_trace = SpanContext::new(
                self.trace.trace_id,
                SpanId::random(),
                self.trace.trace_flags,
                false,
            );
            let outcome = self
                .client
                .invoke(
                    step_id,
                    &service,
                    &capability,
                    &Value::Object(params.clone()),
                    Some(&call_trace),
                    Some(self.call_timeout),
                    cancel,
                )
                .await;
            last_status = outcome.status().or(last_status);

            // A 2xx whose payload is a structured error is a semantic
            // failure; a clean 2xx is done.
            let failed_outcome = match &outcome {
                InvokeOutcome::Success { status, data } => {
                    match ErrorAnalyzer::success_carries_error(data) {
                        None => {
                            return StepResult::success(
                                step_id,
                                &self.step.service_name,
                                data.clone(),
                                started.elapsed(),
                            )
                            .with_status(*status)
                            .with_retries(retry_count);
                        }
                        Some(message) => {
                            debug!(step_id = %step_id, %message, "2xx carried a structured error");
                            outcome.clone()
                        }
                    }
                }
                InvokeOutcome::Cancelled => {
                    return StepResult::failure(
                        step_id,
                        &self.step.service_name,
                        "cancelled",
                        started.elapsed(),
                    )
                    .with_retries(retry_count);
                }
                other => other.clone(),
            };

            let class = self
                .analyzer
                .classify(
                    &self.oracle,
                    &self.step,
                    &capability,
                    &failed_outcome,
                    &signatures,
                )
                .await;
            signatures.push(ErrorAnalyzer::failure_signature(&failed_outcome));

            // The step's own retry policy wins where it is stricter
            // than the runtime cap.
            let mechanical_cap = self.step.retry.max_attempts.min(self.mechanical_max_attempts);
            match class {
                FailureClass::Mechanical if mechanical_attempts + 1 < mechanical_cap => {
                    let backoff = self.step.retry.backoff(mechanical_attempts);
                    mechanical_attempts += 1;
                    retry_count += 1;
                    debug!(
                        step_id = %step_id,
                        attempt = mechanical_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "mechanical retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                FailureClass::ParameterInvalid { fields }
                    if repair_attempts < self.param_repair_max_attempts =>
                {
                    repair_attempts += 1;
                    retry_count += 1;
                    let issues: Vec<FieldIssue> = fields
                        .iter()
                        .map(|field| {
                            FieldIssue::Coercion(crate::schema::CoercionError {
                                field: field.clone(),
                                expected: capability
                                    .field(field)
                                    .map(|f| f.field_type)
                                    .unwrap_or(SemanticType::String),
                                lexeme: format!(
                                    "rejected by service: {}",
                                    failed_outcome.describe()
                                ),
                            })
                        })
                        .collect();
                    match self
                        .resolver
                        .micro_resolve(
                            &self.oracle,
                            &self.step,
                            &capability,
                            &issues,
                            &scope,
                            &self.original_request,
                        )
                        .await
                    {
                        Ok(repaired) => params = repaired,
                        Err(error) => {
                            return StepResult::failure(
                                step_id,
                                &self.step.service_name,
                                format!("layer-3 repair failed: {error}"),
                                started.elapsed(),
                            )
                            .with_retries(retry_count)
                            .with_status_opt(last_status);
                        }
                    }
                }
                FailureClass::SemanticMismatch => {
                    semantic_attempts += 1;
                    match self
                        .resolver
                        .contextual_re_resolve(
                            &self.oracle,
                            &self.step,
                            &capability,
                            &params,
                            &failed_outcome.describe(),
                            &scope,
                            &self.original_request,
                            semantic_attempts,
                        )
                        .await
                    {
                        Ok(Some(corrected)) => {
                            retry_count += 1;
                            params = corrected;
                        }
                        Ok(None) | Err(_) => {
                            return StepResult::failure(
                                step_id,
                                &self.step.service_name,
                                format!(
                                    "semantic failure not recoverable: {}",
                                    failed_outcome.describe()
                                ),
                                started.elapsed(),
                            )
                            .with_retries(retry_count)
                            .with_status_opt(last_status);
                        }
                    }
                }
                other => {
                    warn!(
                        step_id = %step_id,
                        class = ?other,
                        "recovery budget exhausted"
                    );
                    return StepResult::failure(
                        step_id,
                        &self.step.service_name,
                        failed_outcome.describe(),
                        started.elapsed(),
                    )
                    .with_retries(retry_count)
                    .with_status_opt(last_status);
                }
            }
        }
    }
}

/// Builder-style optional status on [`StepResult`].
trait WithStatusOpt {
    fn with_status_opt(self, status: Option<u16>) -> Self;
}

impl WithStatusOpt for StepResult {
    fn with_status_opt(mut self, status: Option<u16>) -> Self {
        self.status_code = status;
        self
    }
}
