//! Parameter resolution (four layers)
//!
//! For each step, parameters pass through up to four layers; the first
//! layer that yields a well-typed, validated parameter set wins:
//!
//! 1. **Template substitution** — `{{identifier}}` from request scope,
//!    `{{step_id.field.path}}` from prior step results. A parameter
//!    that is exactly one template keeps the referent's native type;
//!    embedded templates substitute textually. Missing referents stay
//!    verbatim for Layer 2 to flag.
//! 2. **Schema coercion** — each parameter is coerced to its declared
//!    semantic type and the whole set is validated against the
//!    capability's compiled schema.
//! 3. **LLM micro-resolution** — each still-unresolved field is asked
//!    of the oracle as a single JSON literal, then re-coerced.
//! 4. **Contextual re-resolution** — only after a Layer-3-resolved step
//!    failed at invocation time; the oracle sees the full trajectory
//!    and may propose a corrected parameter set, which is re-validated
//!    through Layer 2.

use crate::llm::{extract_json, OracleSession};
use crate::schema::{coerce, CoercionError, SchemaCache};
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::oracle::GenerateOptions;
use capstan_kernel::plan::Step;
use capstan_kernel::result::StepResult;
use capstan_kernel::service::CapabilityDescriptor;
use capstan_kernel::telemetry::{ObservabilityEvent, SharedEventSink};
use capstan_kernel::template::{lookup_path, ParamValue, TemplateRef, TemplateSegment};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Why one field failed Layers 1–2.
#[derive(Debug, Clone)]
pub enum FieldIssue {
    /// A template referent was missing at substitution time.
    UnresolvedTemplate { field: String, template: String },
    /// Coercion to the declared type failed.
    Coercion(CoercionError),
    /// A required field was absent.
    MissingRequired { field: String },
    /// The compiled schema rejected the assembled object.
    SchemaViolation { detail: String },
}

impl FieldIssue {
    /// The field this issue concerns (empty for whole-object issues).
    pub fn field(&self) -> &str {
        match self {
            FieldIssue::UnresolvedTemplate { field, .. } => field,
            FieldIssue::Coercion(error) => &error.field,
            FieldIssue::MissingRequired { field } => field,
            FieldIssue::SchemaViolation { .. } => "",
        }
    }

    /// Render for prompts and error payloads.
    pub fn describe(&self) -> String {
        match self {
            FieldIssue::UnresolvedTemplate { field, template } => {
                format!("field '{field}' still contains unresolved template '{template}'")
            }
            FieldIssue::Coercion(error) => error.to_string(),
            FieldIssue::MissingRequired { field } => {
                format!("required field '{field}' is missing")
            }
            FieldIssue::SchemaViolation { detail } => detail.clone(),
        }
    }
}

/// Values visible to template substitution for one execution.
pub struct ResolutionScope<'a> {
    /// Request-scope identifiers (`request`, workflow parameters, ...).
    pub request_values: &'a HashMap<String, Value>,
    /// Prior step results, keyed by step id.
    pub step_results: &'a HashMap<String, StepResult>,
}

impl ResolutionScope<'_> {
    fn lookup(&self, reference: &TemplateRef) -> Option<Value> {
        if let Some(result) = self.step_results.get(&reference.root) {
            let view = serde_json::to_value(result).ok()?;
            return lookup_path(&view, &reference.path).cloned();
        }
        let value = self.request_values.get(&reference.root)?;
        if reference.path.is_empty() {
            Some(value.clone())
        } else {
            lookup_path(value, &reference.path).cloned()
        }
    }
}

/// Layer-4 controls.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Whether Layer 4 runs at all.
    pub semantic_retry_enabled: bool,
    /// Layer-4 attempt cap per step.
    pub semantic_retry_max_attempts: u32,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            semantic_retry_enabled: true,
            semantic_retry_max_attempts: 2,
        }
    }
}

/// The four-layer resolver.
pub struct ParameterResolver {
    schemas: Arc<SchemaCache>,
    events: SharedEventSink,
    config: ResolverConfig,
}

impl ParameterResolver {
    /// Create a resolver.
    pub fn new(schemas: Arc<SchemaCache>, events: SharedEventSink, config: ResolverConfig) -> Self {
        Self {
            schemas,
            events,
            config,
        }
    }

    /// Layer-4 controls, read by the executor's recovery loop.
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Layer 1: substitute template references from the scope.
    pub fn substitute(
        &self,
        step: &Step,
        scope: &ResolutionScope<'_>,
    ) -> BTreeMap<String, ParamValue> {
        let mut out = BTreeMap::new();
        for (name, value) in &step.parameters {
            let substituted = match value {
                ParamValue::Literal(_) => value.clone(),
                ParamValue::SingleTemplate(reference) => match scope.lookup(reference) {
                    // Entire-string template: native type preserved.
                    Some(found) => ParamValue::Literal(found),
                    None => value.clone(),
                },
                ParamValue::Composite(segments) => {
                    let mut rendered = String::new();
                    let mut all_found = true;
                    for segment in segments {
                        match segment {
                            TemplateSegment::Text(text) => rendered.push_str(text),
                            TemplateSegment::Template(reference) => {
                                match scope.lookup(reference) {
                                    Some(found) => rendered.push_str(&render_text(&found)),
                                    None => {
                                        all_found = false;
                                        rendered.push_str(&reference.to_template_string());
                                    }
                                }
                            }
                        }
                    }
                    if all_found {
                        ParamValue::Literal(Value::String(rendered))
                    } else {
                        // Re-parse so the remaining templates stay
                        // visible to Layer 2.
                        ParamValue::parse_str(&rendered)
                    }
                }
            };
            out.insert(name.clone(), substituted);
        }
        out
    }

    /// Layer 2: coerce to declared types and validate the whole set.
    pub fn coerce_and_validate(
        &self,
        service_name: &str,
        capability: &CapabilityDescriptor,
        params: &BTreeMap<String, ParamValue>,
    ) -> Result<Map<String, Value>, Vec<FieldIssue>> {
        let mut issues = Vec::new();
        let mut out = Map::new();

        for (name, value) in params {
            match value {
                ParamValue::Literal(literal) => {
                    match capability.field(name) {
                        Some(field) => match coerce(name, literal, field.field_type) {
                            Ok(typed) => {
                                out.insert(name.clone(), typed);
                            }
                            Err(error) => issues.push(FieldIssue::Coercion(error)),
                        },
                        // Fields outside the schema pass through as-is.
                        None => {
                            out.insert(name.clone(), literal.clone());
                        }
                    }
                }
                unresolved => issues.push(FieldIssue::UnresolvedTemplate {
                    field: name.clone(),
                    template: unresolved
                        .to_wire_value()
                        .as_str()
                        .unwrap_or_default()
                        .to_string(),
                }),
            }
        }

        for field in capability.required_fields() {
            if !out.contains_key(&field.name)
                && !issues.iter().any(|i| i.field() == field.name)
            {
                issues.push(FieldIssue::MissingRequired {
                    field: field.name.clone(),
                });
            }
        }

        if issues.is_empty() {
            match self.schemas.get(service_name, capability) {
                Ok(compiled) => {
                    if let Err(violation) = compiled.validate(&Value::Object(out.clone())) {
                        for detail in violation.violations {
                            issues.push(FieldIssue::SchemaViolation { detail });
                        }
                    }
                }
                Err(error) => issues.push(FieldIssue::SchemaViolation {
                    detail: error.to_string(),
                }),
            }
        }

        if issues.is_empty() {
            Ok(out)
        } else {
            Err(issues)
        }
    }

    /// Layers 1+2 together; the common path when nothing needs the oracle.
    pub fn resolve(
        &self,
        step: &Step,
        capability: &CapabilityDescriptor,
        scope: &ResolutionScope<'_>,
    ) -> Result<Map<String, Value>, Vec<FieldIssue>> {
        let substituted = self.substitute(step, scope);
        self.coerce_and_validate(&step.service_name, capability, &substituted)
    }

    /// Layer 3: ask the oracle for each problem field, re-coerce.
    ///
    /// `issues` are the Layer-2 failures (or the analyzer's cited
    /// fields). Returns the repaired parameter object, re-validated
    /// through Layer 2.
    pub async fn micro_resolve(
        &self,
        oracle: &OracleSession,
        step: &Step,
        capability: &CapabilityDescriptor,
        issues: &[FieldIssue],
        scope: &ResolutionScope<'_>,
        original_request: &str,
    ) -> Result<Map<String, Value>, OrchestratorError> {
        let mut params = self.substitute(step, scope);

        for issue in issues {
            let field_name = issue.field();
            if field_name.is_empty() {
                continue;
            }
            let Some(field) = capability.field(field_name) else {
                continue;
            };
            self.events.emit(ObservabilityEvent::MicroResolutionStart {
                step_id: step.step_id.clone(),
                field: field_name.to_string(),
            });
            let started = Instant::now();

            let prompt = self.micro_prompt(step, original_request, scope, field_name, field, issue);
            let outcome = oracle
                .generate("resolver", &prompt, GenerateOptions::structured(256))
                .await;
            let resolved = match &outcome {
                Ok(completion) => {
                    match serde_json::from_str::<Value>(extract_json(&completion.content)) {
                        Ok(literal) => match coerce(field_name, &literal, field.field_type) {
                            Ok(typed) => {
                                params.insert(field_name.to_string(), ParamValue::Literal(typed));
                                true
                            }
                            Err(error) => {
                                warn!(step_id = %step.step_id, %error, "layer-3 literal failed coercion");
                                false
                            }
                        },
                        Err(error) => {
                            warn!(step_id = %step.step_id, %error, "layer-3 output was not a JSON literal");
                            false
                        }
                    }
                }
                Err(error) => {
                    warn!(step_id = %step.step_id, %error, "layer-3 oracle call failed");
                    false
                }
            };

            self.events.emit(ObservabilityEvent::MicroResolutionComplete {
                step_id: step.step_id.clone(),
                field: field_name.to_string(),
                resolved,
                duration: started.elapsed(),
            });
        }

        self.coerce_and_validate(&step.service_name, capability, &params)
            .map_err(|issues| OrchestratorError::StepFailed {
                step_id: step.step_id.clone(),
                reason: format!(
                    "parameters still invalid after micro-resolution: {}",
                    issues
                        .iter()
                        .map(FieldIssue::describe)
                        .collect::<Vec<_>>()
                        .join("; ")
                ),
            })
    }

    fn micro_prompt(
        &self,
        step: &Step,
        original_request: &str,
        scope: &ResolutionScope<'_>,
        field_name: &str,
        field: &capstan_kernel::service::FieldSchema,
        issue: &FieldIssue,
    ) -> String {
        let mut prior = String::new();
        for (step_id, result) in scope.step_results {
            if let Some(data) = &result.data {
                prior.push_str(&format!("  {step_id}: {data}\n"));
            }
        }
        if prior.is_empty() {
            prior.push_str("  (none)\n");
        }
        format!(
            r#"You are repairing one parameter of a service invocation.

Original user request: {original_request}
Step: {} — {}
Problem: {}
Field to produce: "{field_name}" of type {}{}{}

Prior step outputs:
{prior}
Return ONLY a JSON literal of the expected type for this one field (no object wrapper, no commentary)."#,
            step.step_id,
            step.instruction,
            issue.describe(),
            field.field_type,
            field
                .description
                .as_deref()
                .map(|d| format!(" — {d}"))
                .unwrap_or_default(),
            field
                .example
                .as_ref()
                .map(|e| format!(" (example: {e})"))
                .unwrap_or_default(),
        )
    }

    /// Layer 4: contextual re-resolution after an invocation failure.
    ///
    /// Returns `Some(params)` when the oracle proposes a retry with a
    /// corrected parameter set (already re-validated through Layer 2),
    /// `None` when it judges the failure non-parametric.
    pub async fn contextual_re_resolve(
        &self,
        oracle: &OracleSession,
        step: &Step,
        capability: &CapabilityDescriptor,
        failed_params: &Map<String, Value>,
        service_error: &str,
        scope: &ResolutionScope<'_>,
        original_request: &str,
        attempt: u32,
    ) -> Result<Option<Map<String, Value>>, OrchestratorError> {
        if !self.config.semantic_retry_enabled {
            return Ok(None);
        }
        if attempt > self.config.semantic_retry_max_attempts {
            return Ok(None);
        }

        self.events
            .emit(ObservabilityEvent::ContextualReResolutionStart {
                step_id: step.step_id.clone(),
                attempt,
            });
        let started = Instant::now();

        let prompt = self.contextual_prompt(
            step,
            capability,
            failed_params,
            service_error,
            scope,
            original_request,
        );
        let outcome = oracle
            .generate("resolver", &prompt, GenerateOptions::structured(512))
            .await;

        let proposal: Option<Map<String, Value>> = match &outcome {
            Ok(completion) => {
                let parsed: Option<Value> =
                    serde_json::from_str(extract_json(&completion.content)).ok();
                match parsed {
                    Some(verdict) => {
                        let should_retry =
                            verdict["should_retry"].as_bool().unwrap_or(false);
                        if should_retry {
                            verdict["parameters"].as_object().cloned()
                        } else {
                            None
                        }
                    }
                    None => {
                        warn!(step_id = %step.step_id, "layer-4 output was not valid JSON");
                        None
                    }
                }
            }
            Err(error) => {
                warn!(step_id = %step.step_id, %error, "layer-4 oracle call failed");
                None
            }
        };

        let validated = match proposal {
            Some(raw) => {
                let as_params: BTreeMap<String, ParamValue> = raw
                    .into_iter()
                    .map(|(k, v)| (k, ParamValue::Literal(v)))
                    .collect();
                match self.coerce_and_validate(&step.service_name, capability, &as_params) {
                    Ok(params) => Some(params),
                    Err(issues) => {
                        warn!(
                            step_id = %step.step_id,
                            issues = issues.len(),
                            "layer-4 proposal failed re-validation"
                        );
                        None
                    }
                }
            }
            None => None,
        };

        self.events
            .emit(ObservabilityEvent::ContextualReResolutionComplete {
                step_id: step.step_id.clone(),
                attempt,
                should_retry: validated.is_some(),
                duration: started.elapsed(),
            });
        debug!(step_id = %step.step_id, attempt, retry = validated.is_some(), "layer-4 verdict");
        Ok(validated)
    }

    fn contextual_prompt(
        &self,
        step: &Step,
        capability: &CapabilityDescriptor,
        failed_params: &Map<String, Value>,
        service_error: &str,
        scope: &ResolutionScope<'_>,
        original_request: &str,
    ) -> String {
        let mut trajectory = String::new();
        for (step_id, result) in scope.step_results {
            trajectory.push_str(&format!(
                "  {step_id} ({}): {}\n",
                if result.success { "ok" } else { "failed" },
                result
                    .data
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_else(|| result.error.clone().unwrap_or_default()),
            ));
        }
        if trajectory.is_empty() {
            trajectory.push_str("  (no prior steps)\n");
        }
        let schema_lines: Vec<String> = capability
            .input_schema
            .iter()
            .map(|f| {
                format!(
                    "  {} ({}{})",
                    f.name,
                    f.field_type,
                    if f.required { ", required" } else { "" }
                )
            })
            .collect();
        format!(
            r#"A service invocation failed and you must decide whether corrected parameters would fix it.

Original user request: {original_request}

Execution so far:
{trajectory}
Failed step: {} — {}
Capability: {}.{} with schema:
{}
Parameters sent: {}
Service error: {service_error}

If the failure can be fixed by different parameter values (compute them from the
trajectory above if needed, e.g. unit conversions using prior outputs), return:
{{"should_retry": true, "parameters": {{...complete corrected parameter set...}}}}
Otherwise return:
{{"should_retry": false, "reason": "why not"}}
Return ONLY the JSON object."#,
            step.step_id,
            step.instruction,
            step.service_name,
            capability.name,
            schema_lines.join("\n"),
            Value::Object(failed_params.clone()),
        )
    }
}

/// Textual rendering for composite substitution: strings splice bare,
/// containers and scalars splice as JSON.
fn render_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
