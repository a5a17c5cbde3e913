//! Natural-language planner
//!
//! Prompts the oracle with the catalog projection and the user request,
//! parses the JSON plan it emits, then validates and normalises the
//! result against the catalog. Invalid plans re-prompt with the
//! validation error appended, bounded to the configured attempt budget;
//! exhaustion surfaces as `PlanningFailed`.

use crate::catalog::ServiceCatalog;
use crate::llm::{extract_json, OracleSession};
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::oracle::GenerateOptions;
use capstan_kernel::plan::{Plan, PlanMode, Step};
use capstan_kernel::service::CapabilityDescriptor;
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use capstan_kernel::template::{ParamValue, TemplateSegment};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Identifiers every plan may reference from request scope.
pub fn request_scope() -> HashSet<String> {
    ["request".to_string(), "original_request".to_string()].into()
}

/// Planner configuration slice.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Re-prompt budget for invalid plans.
    pub max_attempts: u32,
    /// Sampling temperature.
    pub temperature: f32,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Whether zero-step plans are accepted.
    pub allow_empty_plans: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            temperature: 0.2,
            max_tokens: 2048,
            allow_empty_plans: true,
        }
    }
}

/// LLM-backed plan generation against the live catalog.
pub struct NaturalPlanner {
    catalog: Arc<ServiceCatalog>,
    events: SharedEventSink,
    config: PlannerConfig,
}

impl NaturalPlanner {
    /// Create a planner over the catalog.
    pub fn new(catalog: Arc<ServiceCatalog>, events: SharedEventSink, config: PlannerConfig) -> Self {
        Self {
            catalog,
            events,
            config,
        }
    }

    /// Generate a validated, normalised plan for the request.
    pub async fn generate(
        &self,
        request_id: Uuid,
        request: &str,
        oracle: &OracleSession,
    ) -> Result<Plan, OrchestratorError> {
        if self.catalog.is_empty() {
            return Err(OrchestratorError::PlanningFailed {
                request_id,
                reason: "service catalog is empty".into(),
            });
        }

        let projection = self.catalog.format_for_planner();
        let keywords = intent_keywords(request);
        let keyword_refs: Vec<&str> = keywords.iter().map(String::as_str).collect();
        let focus = self.catalog.capabilities_by_intent(&keyword_refs);
        let mut feedback: Option<String> = None;
        let snapshot_len = self.catalog.snapshot().len();

        for attempt in 1..=self.config.max_attempts {
            let prompt = self.build_prompt(request, &projection, &focus, feedback.as_deref());
            self.events.emit(ObservabilityEvent::PlanGenerationRequest {
                request_id,
                attempt,
                catalog_services: snapshot_len,
            });
            let started = Instant::now();
            let completion = oracle
                .generate(
                    "planner",
                    &prompt,
                    GenerateOptions {
                        temperature: Some(self.config.temperature),
                        max_tokens: Some(self.config.max_tokens),
                        model_alias: Some("planning".into()),
                    },
                )
                .await
                .map_err(|e| OrchestratorError::PlanningFailed {
                    request_id,
                    reason: format!("oracle failure: {e}"),
                })?;
            self.events.emit(ObservabilityEvent::PlanGenerationResponse {
                request_id,
                attempt,
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
                provider: completion.provider.clone(),
                duration: started.elapsed(),
            });

            match self.parse_and_validate(request, &completion.content) {
                Ok(plan) => {
                    info!(
                        request_id = %request_id,
                        steps = plan.steps.len(),
                        attempt,
                        "plan accepted"
                    );
                    return Ok(plan);
                }
                Err(reason) => {
                    warn!(request_id = %request_id, attempt, %reason, "plan rejected");
                    feedback = Some(reason);
                }
            }
        }

        Err(OrchestratorError::PlanningFailed {
            request_id,
            reason: format!(
                "no valid plan after {} attempts; last error: {}",
                self.config.max_attempts,
                feedback.unwrap_or_else(|| "unknown".into())
            ),
        })
    }

    fn build_prompt(
        &self,
        request: &str,
        projection: &str,
        focus: &[(String, CapabilityDescriptor)],
        feedback: Option<&str>,
    ) -> String {
        let mut prompt = format!(
            r#"You are the planning component of a service orchestration runtime.
Decompose the user request into steps that invoke the capabilities listed below, and nothing else.

Available services and capabilities:
{projection}
Return a JSON object with this exact structure:
{{
  "steps": [
    {{
      "step_id": "unique_id",
      "service_name": "a listed service",
      "capability_name": "a capability of that service",
      "instruction": "what this step accomplishes",
      "depends_on": ["ids of earlier steps"],
      "parameters": {{"field": "value or template"}},
      "required": true,
      "parallel": false
    }}
  ]
}}

Rules:
- Use ONLY (service_name, capability_name) pairs from the list above.
- depends_on may only reference ids of earlier steps in this plan; no cycles.
- A parameter may be a literal, {{{{request}}}} for the full user request, or
  {{{{step_id.data.field}}}} to feed a prior step's output forward.
- Fill every required field of each capability's schema.
- Steps with no dependency between them run in parallel.
- Return ONLY the JSON object, no other text."#
        );
        if !focus.is_empty() {
            prompt.push_str("\n\nCapabilities most relevant to this request, best match first:\n");
            for (service, capability) in focus.iter().take(5) {
                prompt.push_str(&format!("- {service}.{}\n", capability.name));
            }
        }
        if let Some(feedback) = feedback {
            prompt.push_str(&format!(
                "\n\nYour previous plan was rejected: {feedback}\nEmit a corrected plan."
            ));
        }
        prompt.push_str(&format!("\n\nUser request: {request}"));
        prompt
    }

    /// Parse the oracle output, check it against the catalog, and
    /// normalise step ids to `step-N-<capability>`.
    fn parse_and_validate(&self, request: &str, response: &str) -> Result<Plan, String> {
        let json_str = extract_json(response);
        let raw: serde_json::Value = serde_json::from_str(json_str)
            .map_err(|e| format!("plan is not valid JSON: {e}"))?;
        let raw_steps = raw["steps"]
            .as_array()
            .ok_or_else(|| "plan is missing the 'steps' array".to_string())?;

        if raw_steps.is_empty() && !self.config.allow_empty_plans {
            return Err("plan has zero steps".to_string());
        }

        let mut plan = Plan::new(request, PlanMode::Autonomous);
        let mut rename: HashMap<String, String> = HashMap::new();

        for (index, raw_step) in raw_steps.iter().enumerate() {
            let service_name = raw_step["service_name"]
                .as_str()
                .ok_or_else(|| format!("step {index} is missing 'service_name'"))?;
            let capability_name = raw_step["capability_name"]
                .as_str()
                .ok_or_else(|| format!("step {index} is missing 'capability_name'"))?;

            if self
                .catalog
                .find_capability(service_name, capability_name)
                .is_none()
            {
                return Err(format!(
                    "step {index} references unknown capability '{service_name}.{capability_name}'"
                ));
            }

            let old_id = raw_step["step_id"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("step_{index}"));
            let new_id = format!("step-{}-{capability_name}", index + 1);
            rename.insert(old_id, new_id.clone());

            let mut step = Step::new(new_id, service_name, capability_name);
            if let Some(instruction) = raw_step["instruction"].as_str() {
                step.instruction = instruction.to_string();
            }
            if let Some(dependencies) = raw_step["depends_on"].as_array() {
                for dependency in dependencies {
                    if let Some(d) = dependency.as_str() {
                        step.depends_on.push(d.to_string());
                    }
                }
            }
            if let Some(parameters) = raw_step["parameters"].as_object() {
                for (name, value) in parameters {
                    step.parameters
                        .insert(name.clone(), ParamValue::parse_value(value.clone()));
                }
            }
            if let Some(required) = raw_step["required"].as_bool() {
                step.required = required;
            }
            if let Some(parallel) = raw_step["parallel"].as_bool() {
                step.parallel_hint = parallel;
            }
            plan.steps.push(step);
        }

        rewrite_references(&mut plan, &rename);

        plan.compile().map_err(|e| e.to_string())?;
        plan.validate_templates(&request_scope())
            .map_err(|e| e.to_string())?;
        Ok(plan)
    }
}

/// Keywords used to pre-rank the catalog for the prompt's focus list.
///
/// Words shorter than four characters are dropped; that loses little
/// signal and keeps articles and prepositions out of the ranking.
fn intent_keywords(request: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    request
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= 4)
        .map(str::to_lowercase)
        .filter(|word| seen.insert(word.clone()))
        .collect()
}

/// Rewrite `depends_on` entries and template roots after renaming.
fn rewrite_references(plan: &mut Plan, rename: &HashMap<String, String>) {
    for step in &mut plan.steps {
        for dependency in &mut step.depends_on {
            if let Some(new_id) = rename.get(dependency) {
                *dependency = new_id.clone();
            }
        }
        for value in step.parameters.values_mut() {
            match value {
                ParamValue::SingleTemplate(reference) => {
                    if let Some(new_id) = rename.get(&reference.root) {
                        reference.root = new_id.clone();
                    }
                }
                ParamValue::Composite(segments) => {
                    for segment in segments {
                        if let TemplateSegment::Template(reference) = segment {
                            if let Some(new_id) = rename.get(&reference.root) {
                                reference.root = new_id.clone();
                            }
                        }
                    }
                }
                ParamValue::Literal(_) => {}
            }
        }
    }
}
