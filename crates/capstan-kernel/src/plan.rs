//! Plan IR
//!
//! A [`Plan`] is a DAG of capability invocations. Steps are stored in an
//! arena (a plain `Vec`); the compiled [`PlanGraph`] carries dependency
//! edges as integer indices into that arena, which keeps cancellation,
//! serialisation to the task store, and JSON round-tripping through the
//! HTTP API straightforward.

use crate::template::ParamValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// How a plan came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanMode {
    /// Instantiated from a pre-authored workflow template.
    Workflow,
    /// Generated by the planner from a natural-language request.
    Autonomous,
    /// A workflow template extended by the planner.
    Hybrid,
}

/// Retry policy for mechanical (transport-level) step failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first (1 = no retry).
    pub max_attempts: u32,
    /// Backoff before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff multiplier per subsequent retry.
    pub multiplier: f64,
    /// Upper bound on a single backoff, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            multiplier: 2.0,
            max_backoff_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based), capped.
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.initial_backoff_ms as f64 * self.multiplier.powi(retry as i32);
        Duration::from_millis((base as u64).min(self.max_backoff_ms))
    }
}

/// One node in a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Unique within the plan; normalised to `step-N-<capability>`.
    pub step_id: String,
    /// Service half of the fully-qualified capability address.
    pub service_name: String,
    /// Capability half of the fully-qualified capability address.
    pub capability_name: String,
    /// Free text describing intent, for human and LLM audit.
    #[serde(default)]
    pub instruction: String,
    /// Step ids this step waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Parameters in template IR form (ordered for determinism).
    #[serde(default)]
    pub parameters: BTreeMap<String, ParamValue>,
    /// Planner hint that this step may run alongside its wave peers.
    #[serde(default)]
    pub parallel_hint: bool,
    /// Whether failure of this step fails the plan.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Per-step timeout in milliseconds (`None` = runtime default).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Mechanical retry policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_required() -> bool {
    true
}

impl Step {
    /// Create a step with defaults for everything but the address.
    pub fn new(
        step_id: impl Into<String>,
        service_name: impl Into<String>,
        capability_name: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service_name: service_name.into(),
            capability_name: capability_name.into(),
            instruction: String::new(),
            depends_on: Vec::new(),
            parameters: BTreeMap::new(),
            parallel_hint: false,
            required: true,
            timeout_ms: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Add a dependency edge.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Set a parameter from a raw JSON value (templates are parsed).
    pub fn with_parameter(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters
            .insert(name.into(), ParamValue::parse_value(value));
        self
    }

    /// Set the audit instruction.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    /// Mark the step optional (its failure does not fail the plan).
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set the per-step timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }
}

/// A validated DAG of capability invocations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    /// Unique plan id.
    pub plan_id: Uuid,
    /// The request this plan answers.
    pub original_request: String,
    /// Provenance of the plan.
    pub mode: PlanMode,
    /// Steps in arena order.
    pub steps: Vec<Step>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
}

impl Plan {
    /// Create an empty plan for a request.
    pub fn new(original_request: impl Into<String>, mode: PlanMode) -> Self {
        Self {
            plan_id: Uuid::new_v4(),
            original_request: original_request.into(),
            mode,
            steps: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Append a step.
    pub fn add_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Arena index of a step id.
    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.step_id == step_id)
    }

    /// Compile the dependency structure, verifying every plan invariant:
    /// unique step ids, known dependencies, acyclicity, non-zero
    /// timeouts.
    pub fn compile(&self) -> Result<PlanGraph, PlanError> {
        PlanGraph::compile(self)
    }

    /// Check that every template reference points at a declared step or
    /// one of the given request-scope identifiers.
    ///
    /// A reference with a dotted path must name a step; a bare
    /// identifier may name either a step (whole-result reference) or a
    /// request parameter.
    pub fn validate_templates(&self, request_scope: &HashSet<String>) -> Result<(), PlanError> {
        let step_ids: HashSet<&str> = self.steps.iter().map(|s| s.step_id.as_str()).collect();
        for step in &self.steps {
            for (param, value) in &step.parameters {
                for reference in value.references() {
                    let known = step_ids.contains(reference.root.as_str())
                        || (!reference.has_path() && request_scope.contains(&reference.root));
                    if !known {
                        return Err(PlanError::UnknownTemplateReference {
                            step_id: step.step_id.clone(),
                            parameter: param.clone(),
                            reference: reference.to_template_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// A plan invariant violation.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum PlanError {
    #[error("duplicate step id '{0}'")]
    DuplicateStepId(String),

    #[error("step '{step_id}' depends on unknown step '{dependency}'")]
    UnknownDependency { step_id: String, dependency: String },

    #[error("dependency cycle involving steps {0:?}")]
    Cycle(Vec<String>),

    #[error("step '{0}' has a zero timeout")]
    ZeroTimeout(String),

    #[error("step '{step_id}' parameter '{parameter}' references undefined '{reference}'")]
    UnknownTemplateReference {
        step_id: String,
        parameter: String,
        reference: String,
    },
}

/// Compiled dependency structure of a [`Plan`].
///
/// All edges are integer indices into the plan's step arena.
#[derive(Debug, Clone)]
pub struct PlanGraph {
    /// Step id → arena index.
    index_of: HashMap<String, usize>,
    /// For each step, the indices it depends on.
    dependencies: Vec<Vec<usize>>,
    /// For each step, the indices that depend on it.
    dependents: Vec<Vec<usize>>,
    /// A stable topological order (ties broken by arena index).
    topological: Vec<usize>,
}

impl PlanGraph {
    fn compile(plan: &Plan) -> Result<Self, PlanError> {
        let mut index_of = HashMap::with_capacity(plan.steps.len());
        for (index, step) in plan.steps.iter().enumerate() {
            if step.timeout_ms == Some(0) {
                return Err(PlanError::ZeroTimeout(step.step_id.clone()));
            }
            if index_of.insert(step.step_id.clone(), index).is_some() {
                return Err(PlanError::DuplicateStepId(step.step_id.clone()));
            }
        }

        let mut dependencies = vec![Vec::new(); plan.steps.len()];
        let mut dependents = vec![Vec::new(); plan.steps.len()];
        for (index, step) in plan.steps.iter().enumerate() {
            for dependency in &step.depends_on {
                let Some(&dep_index) = index_of.get(dependency.as_str()) else {
                    return Err(PlanError::UnknownDependency {
                        step_id: step.step_id.clone(),
                        dependency: dependency.clone(),
                    });
                };
                dependencies[index].push(dep_index);
                dependents[dep_index].push(index);
            }
        }

        // Kahn's algorithm; a BTreeSet frontier keeps the order stable.
        let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
        let mut frontier: std::collections::BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();
        let mut topological = Vec::with_capacity(plan.steps.len());
        while let Some(index) = frontier.pop_first() {
            topological.push(index);
            for &dependent in &dependents[index] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    frontier.insert(dependent);
                }
            }
        }
        if topological.len() != plan.steps.len() {
            let stuck: Vec<String> = in_degree
                .iter()
                .enumerate()
                .filter(|(_, d)| **d > 0)
                .map(|(i, _)| plan.steps[i].step_id.clone())
                .collect();
            return Err(PlanError::Cycle(stuck));
        }

        Ok(Self {
            index_of,
            dependencies,
            dependents,
            topological,
        })
    }

    /// Arena index of a step id.
    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.index_of.get(step_id).copied()
    }

    /// Dependency indices of one step.
    pub fn dependencies(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    /// Dependent indices of one step.
    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    /// The stable topological order.
    pub fn topological(&self) -> &[usize] {
        &self.topological
    }

    /// Number of steps in the arena.
    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    /// Whether the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// All indices transitively reachable from `index` along dependent
    /// edges (used to mark the downstream cone of a failed step).
    pub fn downstream_of(&self, index: usize) -> Vec<usize> {
        let mut seen = vec![false; self.len()];
        let mut queue = VecDeque::from([index]);
        let mut out = Vec::new();
        while let Some(current) = queue.pop_front() {
            for &dependent in &self.dependents[current] {
                if !seen[dependent] {
                    seen[dependent] = true;
                    out.push(dependent);
                    queue.push_back(dependent);
                }
            }
        }
        out
    }
}
