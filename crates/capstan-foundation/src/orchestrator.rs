//! Orchestrator facade
//!
//! Wires planner → executor → synthesiser into the two entry points the
//! gateway (and the async task handler) call: natural-language
//! orchestration and named-workflow orchestration. One
//! [`crate::llm::OracleSession`] spans each request, so every oracle
//! call inside one execution shares the retry policy, the prompt memo,
//! and the debug capture.

use crate::catalog::ServiceCatalog;
use crate::executor::{DagExecutor, StepCompletion};
use crate::llm::OracleSession;
use crate::planner::{NaturalPlanner, WorkflowPlanner};
use crate::synthesizer::Synthesizer;
use capstan_kernel::config::RuntimeConfig;
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::oracle::LlmOracle;
use capstan_kernel::plan::Plan;
use capstan_kernel::result::ExecutionResult;
use capstan_monitoring::{LlmDebugCapture, SpanContext};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

/// Per-request execution options.
pub struct OrchestrateOptions {
    /// Run the synthesiser over the step outputs.
    pub ai_synthesis: bool,
    /// Caller's trace context, continued into capability calls.
    pub trace: Option<SpanContext>,
    /// External cancellation.
    pub cancel: CancellationToken,
    /// Serialised per-step completion notifications.
    pub completions: Option<mpsc::Sender<StepCompletion>>,
}

impl Default for OrchestrateOptions {
    fn default() -> Self {
        Self {
            ai_synthesis: true,
            trace: None,
            cancel: CancellationToken::new(),
            completions: None,
        }
    }
}

/// The orchestration pipeline.
pub struct Orchestrator {
    catalog: Arc<ServiceCatalog>,
    planner: NaturalPlanner,
    workflows: Arc<WorkflowPlanner>,
    executor: DagExecutor,
    synthesizer: Synthesizer,
    oracle: Arc<dyn LlmOracle>,
    capture: Option<Arc<LlmDebugCapture>>,
    config: RuntimeConfig,
}

impl Orchestrator {
    /// Assemble the pipeline.
    pub fn new(
        catalog: Arc<ServiceCatalog>,
        planner: NaturalPlanner,
        workflows: Arc<WorkflowPlanner>,
        executor: DagExecutor,
        oracle: Arc<dyn LlmOracle>,
        capture: Option<Arc<LlmDebugCapture>>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            catalog,
            planner,
            workflows,
            executor,
            synthesizer: Synthesizer::new(),
            oracle,
            capture,
            config,
        }
    }

    /// The workflow registry, for registration at bootstrap.
    pub fn workflows(&self) -> &Arc<WorkflowPlanner> {
        &self.workflows
    }

    /// The catalog, for health reporting.
    pub fn catalog(&self) -> &Arc<ServiceCatalog> {
        &self.catalog
    }

    fn session(&self) -> Arc<OracleSession> {
        let mut session = OracleSession::new(
            Arc::clone(&self.oracle),
            self.config.oracle_max_attempts,
            self.config.mechanical_backoff_base,
        );
        if let Some(capture) = &self.capture {
            session = session.with_capture(Arc::clone(capture));
        }
        Arc::new(session)
    }

    /// Natural-language orchestration: plan, execute, synthesise.
    ///
    /// Step-level failures are reported **in** the result (`success`,
    /// `confidence`, per-step errors), not as an `Err`; only failures
    /// that prevent or abort the execution as a whole (invalid input,
    /// planning, timeout, cancellation, internal) surface as errors.
    pub async fn orchestrate_natural(
        &self,
        request: &str,
        options: OrchestrateOptions,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let request = request.trim();
        if request.is_empty() {
            return Err(OrchestratorError::InvalidInput("request is empty".into()));
        }
        let request_id = Uuid::new_v4();
        let session = self.session();

        let plan = self
            .planner
            .generate(request_id, request, &session)
            .await?;

        if plan.steps.is_empty() && !self.config.allow_empty_plans {
            return Err(OrchestratorError::InvalidInput(
                "planner produced a zero-step plan".into(),
            ));
        }

        let mut request_values = HashMap::new();
        request_values.insert("request".to_string(), Value::String(request.to_string()));
        request_values.insert(
            "original_request".to_string(),
            Value::String(request.to_string()),
        );

        self.run(request_id, plan, request_values, session, options)
            .await
    }

    /// Named-workflow orchestration: instantiate, execute, synthesise.
    pub async fn orchestrate_workflow(
        &self,
        name: &str,
        parameters: &HashMap<String, Value>,
        options: OrchestrateOptions,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let request_id = Uuid::new_v4();
        let (plan, mut request_values) = self.workflows.instantiate(name, parameters)?;
        request_values
            .entry("request".to_string())
            .or_insert_with(|| Value::String(plan.original_request.clone()));
        let session = self.session();
        self.run(request_id, plan, request_values, session, options)
            .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        plan: Plan,
        request_values: HashMap<String, Value>,
        session: Arc<OracleSession>,
        options: OrchestrateOptions,
    ) -> Result<ExecutionResult, OrchestratorError> {
        let started = Instant::now();
        let outcome = self
            .executor
            .execute(
                &plan,
                &request_values,
                Arc::clone(&session),
                options.trace,
                options.cancel,
                options.completions,
            )
            .await;

        // Whole-plan aborts surface as errors; step-level failures are
        // part of the result view.
        match &outcome.error {
            Some(error @ OrchestratorError::Timeout { .. })
            | Some(error @ OrchestratorError::Cancelled(_))
            | Some(error @ OrchestratorError::InternalError(_)) => {
                return Err(error.clone());
            }
            _ => {}
        }

        let synthesized = if options.ai_synthesis
            && outcome.step_results.iter().any(|r| r.success)
        {
            self.synthesizer
                .synthesize(&session, &plan.original_request, &outcome.step_results)
                .await
        } else {
            None
        };

        let result = ExecutionResult::assemble(
            request_id,
            plan,
            outcome.step_results,
            synthesized,
            started.elapsed(),
        );
        info!(
            request_id = %request_id,
            success = result.success,
            confidence = result.confidence,
            tools = result.tools_used.len(),
            duration_ms = result.execution_time.as_millis() as u64,
            "orchestration finished"
        );
        Ok(result)
    }
}
