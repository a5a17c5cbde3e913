//! DAG executor
//!
//! Ready-wave scheduling over the plan's arena-indexed graph:
//!
//! - every step whose dependencies are settled launches concurrently
//!   (bounded by a per-plan semaphore), moving pending → running;
//! - completions are drained one at a time, so result-map writes and
//!   the `OnStepComplete` notifications are totally ordered even though
//!   step bodies run in parallel;
//! - per-step and whole-plan timeouts, and external cancellation, all
//!   flow through one `CancellationToken` hierarchy — a required step's
//!   final failure cancels everything still running;
//! - each step runs the recovery pipeline: resolve (Layers 1+2),
//!   invoke, classify, then mechanical backoff / Layer-3 repair /
//!   Layer-4 semantic retry as the analyzer directs.

mod step_runner;

pub use step_runner::StepRunner;

use crate::analyzer::ErrorAnalyzer;
use crate::capability::CapabilityClient;
use crate::catalog::ServiceCatalog;
use crate::llm::OracleSession;
use crate::resolver::ParameterResolver;
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::plan::Plan;
use capstan_kernel::result::StepResult;
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use capstan_monitoring::SpanContext;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Executor tunables (one slice of the runtime config).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Bound on concurrently running steps per plan.
    pub max_parallel_steps: usize,
    /// Default per-step timeout (a step's own value wins).
    pub step_timeout: Duration,
    /// Whole-plan timeout.
    pub plan_timeout: Duration,
    /// Per-call timeout handed to the capability client.
    pub call_timeout: Duration,
    /// Mechanical retry cap.
    pub mechanical_max_attempts: u32,
    /// Layer-3 repair cap per failure episode.
    pub param_repair_max_attempts: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 8,
            step_timeout: Duration::from_secs(120),
            plan_timeout: Duration::from_secs(300),
            call_timeout: Duration::from_secs(60),
            mechanical_max_attempts: 3,
            param_repair_max_attempts: 2,
        }
    }
}

/// Serialised per-step completion notification.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub step_id: String,
    pub service_name: String,
    pub success: bool,
    pub duration: Duration,
    /// 1-based completion ordinal within the plan.
    pub ordinal: u32,
    /// Total steps in the plan.
    pub total: u32,
}

/// What `execute` hands back: every step result (completion order,
/// skipped steps appended) and the plan-level failure if any.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub step_results: Vec<StepResult>,
    pub error: Option<OrchestratorError>,
}

impl ExecutionOutcome {
    /// Whether every required step succeeded.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone, Copy, PartialEq)]
enum StepState {
    Pending,
    Running,
    Done,
}

/// The DAG executor.
pub struct DagExecutor {
    catalog: Arc<ServiceCatalog>,
    client: Arc<CapabilityClient>,
    resolver: Arc<ParameterResolver>,
    analyzer: ErrorAnalyzer,
    events: SharedEventSink,
    config: ExecutorConfig,
}

impl DagExecutor {
    /// Create an executor.
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        client: Arc<CapabilityClient>,
        resolver: Arc<ParameterResolver>,
        events: SharedEventSink,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            catalog,
            client,
            resolver,
            analyzer: ErrorAnalyzer::new(),
            events,
            config,
        }
    }

    /// Execute a validated plan.
    ///
    /// `request_values` is the request scope for Layer-1 substitution.
    /// `trace` is the caller's span context; capability invocations
    /// continue its trace id. `completions` (when given) receives one
    /// [`StepCompletion`] per step, in completion order, serialised.
    pub async fn execute(
        &self,
        plan: &Plan,
        request_values: &HashMap<String, Value>,
        oracle: Arc<OracleSession>,
        trace: Option<SpanContext>,
        cancel: CancellationToken,
        completions: Option<mpsc::Sender<StepCompletion>>,
    ) -> ExecutionOutcome {
        let total = plan.steps.len() as u32;
        if plan.steps.is_empty() {
            return ExecutionOutcome {
                step_results: Vec::new(),
                error: None,
            };
        }

        let graph = match plan.compile() {
            Ok(graph) => graph,
            Err(error) => {
                return ExecutionOutcome {
                    step_results: Vec::new(),
                    error: Some(OrchestratorError::InternalError(format!(
                        "plan failed re-validation at execution time: {error}"
                    ))),
                };
            }
        };

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + self.config.plan_timeout;
        let plan_cancel = cancel.child_token();
        let plan_trace = trace.unwrap_or_else(SpanContext::new_root);
        let semaphore = Arc::new(Semaphore::new(self.config.max_parallel_steps));

        let mut states = vec![StepState::Pending; plan.steps.len()];
        let mut results_by_id: HashMap<String, StepResult> = HashMap::new();
        let mut completion_order: Vec<StepResult> = Vec::new();
        let mut in_flight: JoinSet<(usize, StepResult)> = JoinSet::new();
        let mut failure: Option<OrchestratorError> = None;

        info!(plan_id = %plan.plan_id, steps = plan.steps.len(), "plan execution started");

        'schedule: loop {
            // Launch every ready step in the current wave.
            for index in 0..plan.steps.len() {
                if states[index] != StepState::Pending {
                    continue;
                }
                let ready = graph.dependencies(index).iter().all(|&dep| {
                    states[dep] == StepState::Done
                        && results_by_id
                            .get(&plan.steps[dep].step_id)
                            .map(|r| r.success || !plan.steps[dep].required)
                            .unwrap_or(false)
                });
                if !ready {
                    continue;
                }
                states[index] = StepState::Running;
                let runner = StepRunner {
                    step: plan.steps[index].clone(),
                    catalog: Arc::clone(&self.catalog),
                    client: Arc::clone(&self.client),
                    resolver: Arc::clone(&self.resolver),
                    analyzer: self.analyzer,
                    oracle: Arc::clone(&oracle),
                    request_values: request_values.clone(),
                    step_results: results_by_id.clone(),
                    original_request: plan.original_request.clone(),
                    trace: plan_trace.clone(),
                    step_timeout: self.config.step_timeout,
                    call_timeout: self.config.call_timeout,
                    mechanical_max_attempts: self.config.mechanical_max_attempts,
                    param_repair_max_attempts: self.config.param_repair_max_attempts,
                };
                let permit_source = Arc::clone(&semaphore);
                let step_cancel = plan_cancel.child_token();
                debug!(step_id = %runner.step.step_id, "step ready; launching");
                in_flight.spawn(async move {
                    let _permit = permit_source
                        .acquire_owned()
                        .await
                        .expect("executor semaphore never closes");
                    (index, runner.run(step_cancel).await)
                });
            }

            if in_flight.is_empty() {
                // Nothing running and nothing became ready: all settled.
                break;
            }

            // Await the next completion, the plan deadline, or cancellation.
            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!(plan_id = %plan.plan_id, "plan cancelled by caller");
                    failure = Some(OrchestratorError::Cancelled(format!(
                        "plan {} cancelled",
                        plan.plan_id
                    )));
                    plan_cancel.cancel();
                    break 'schedule;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    warn!(plan_id = %plan.plan_id, "plan timeout exceeded");
                    failure = Some(OrchestratorError::Timeout {
                        scope: format!("plan {}", plan.plan_id),
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                    plan_cancel.cancel();
                    break 'schedule;
                }
                joined = in_flight.join_next() => joined,
            };

            let Some(joined) = joined else { break };
            let (index, result) = match joined {
                Ok(pair) => pair,
                Err(join_error) => {
                    failure = Some(OrchestratorError::InternalError(format!(
                        "step task panicked: {join_error}"
                    )));
                    plan_cancel.cancel();
                    break 'schedule;
                }
            };

            states[index] = StepState::Done;
            let step = &plan.steps[index];
            self.events.emit(ObservabilityEvent::StepComplete {
                step_id: result.step_id.clone(),
                service_name: result.service_name.clone(),
                success: result.success,
                duration: result.duration,
            });
            if let Some(sender) = &completions {
                let notification = StepCompletion {
                    step_id: result.step_id.clone(),
                    service_name: result.service_name.clone(),
                    success: result.success,
                    duration: result.duration,
                    ordinal: (completion_order.len() + 1) as u32,
                    total,
                };
                // Serialised by construction: sent from the drain loop.
                let _ = sender.send(notification).await;
            }

            let failed_required = !result.success && step.required;
            if failed_required {
                warn!(
                    plan_id = %plan.plan_id,
                    step_id = %result.step_id,
                    "required step failed after recovery; cancelling the wave"
                );
                failure = Some(OrchestratorError::StepFailed {
                    step_id: result.step_id.clone(),
                    reason: result.error.clone().unwrap_or_else(|| "unknown".into()),
                });
            }
            results_by_id.insert(result.step_id.clone(), result.clone());
            completion_order.push(result);
            if failed_required {
                plan_cancel.cancel();
                break 'schedule;
            }
        }

        // Drain whatever was still running when the loop ended (the
        // cancellation token has already fired on abnormal exits).
        while let Some(joined) = in_flight.join_next().await {
            if let Ok((index, result)) = joined {
                states[index] = StepState::Done;
                results_by_id.insert(result.step_id.clone(), result.clone());
                completion_order.push(result);
            }
        }

        // Steps that never started are recorded as skipped. Steps in
        // the failed step's downstream cone carry the dependency
        // diagnosis; the rest were simply cut off by the abort.
        let failed_cone: Vec<usize> = match &failure {
            Some(OrchestratorError::StepFailed { step_id, .. }) => graph
                .index_of(step_id)
                .map(|index| graph.downstream_of(index))
                .unwrap_or_default(),
            _ => Vec::new(),
        };
        for (index, step) in plan.steps.iter().enumerate() {
            if states[index] == StepState::Pending {
                let reason = if failed_cone.contains(&index) {
                    "upstream dependency failed"
                } else {
                    "plan aborted before start"
                };
                completion_order.push(StepResult::skipped(
                    &step.step_id,
                    &step.service_name,
                    reason,
                ));
            }
        }

        info!(
            plan_id = %plan.plan_id,
            duration_ms = started.elapsed().as_millis() as u64,
            success = failure.is_none(),
            "plan execution finished"
        );
        ExecutionOutcome {
            step_results: completion_order,
            error: failure,
        }
    }
}
