//! Failure classification (the recovery pipeline's switchboard)
//!
//! Classifies a failed invocation into the class that selects the next
//! recovery layer: mechanical retry, Layer-3 field repair, Layer-4
//! contextual re-resolution, or giving up. Status code and body shape
//! decide the obvious cases; the oracle is consulted once per failure
//! episode when they do not.

use crate::capability::InvokeOutcome;
use crate::llm::{extract_json, OracleSession};
use capstan_kernel::oracle::GenerateOptions;
use capstan_kernel::plan::Step;
use capstan_kernel::service::CapabilityDescriptor;
use serde_json::Value;
use tracing::{debug, warn};

/// What kind of failure this is, and therefore what to try next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureClass {
    /// Transient transport-level failure: retry with backoff.
    Mechanical,
    /// Field-level validation rejection: Layer-3 re-resolution of the
    /// cited fields (all schema fields when none are cited).
    ParameterInvalid { fields: Vec<String> },
    /// The fix needs cross-step reasoning: Layer-4 re-resolution.
    SemanticMismatch,
    /// Not worth another attempt.
    Unrecoverable,
}

/// Step failure classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorAnalyzer;

impl ErrorAnalyzer {
    /// Create an analyzer.
    pub fn new() -> Self {
        Self
    }

    /// A stable signature for "the same failure happened again".
    pub fn failure_signature(outcome: &InvokeOutcome) -> String {
        match outcome {
            InvokeOutcome::HttpError {
                status,
                description,
                ..
            } => format!("http:{status}:{description}"),
            InvokeOutcome::TimedOut { .. } => "timeout".to_string(),
            InvokeOutcome::Transport { description } => format!("transport:{description}"),
            InvokeOutcome::Cancelled => "cancelled".to_string(),
            // A 2xx carrying a structured error: keyed by the message
            // so differing semantic errors do not read as repeats.
            InvokeOutcome::Success { data, .. } => match Self::success_carries_error(data) {
                Some(message) => format!("semantic:{message}"),
                None => "success".to_string(),
            },
        }
    }

    /// Detect a 200-level response whose payload is actually an error.
    pub fn success_carries_error(data: &Value) -> Option<String> {
        let object = data.as_object()?;
        if let Some(Value::String(message)) = object.get("error") {
            return Some(message.clone());
        }
        if let Some(Value::Bool(false)) = object.get("success") {
            return Some(
                object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("service reported success=false")
                    .to_string(),
            );
        }
        None
    }

    /// Classify a failed invocation.
    ///
    /// `prior_signatures` are this step's earlier failure signatures;
    /// an identical repeat short-circuits to [`FailureClass::Unrecoverable`].
    pub async fn classify(
        &self,
        oracle: &OracleSession,
        step: &Step,
        capability: &CapabilityDescriptor,
        outcome: &InvokeOutcome,
        prior_signatures: &[String],
    ) -> FailureClass {
        // A repeat of an already-seen failure means the last repair
        // changed nothing. Mechanical failures are exempt: identical
        // 5xx bodies are exactly what a transient outage looks like,
        // and the backoff budget bounds those retries.
        let signature = Self::failure_signature(outcome);
        let repeated = prior_signatures.contains(&signature);
        let base = self.classify_fresh(oracle, step, capability, outcome).await;
        if repeated && base != FailureClass::Mechanical {
            debug!(step_id = %step.step_id, "repeated identical failure");
            return FailureClass::Unrecoverable;
        }
        base
    }

    async fn classify_fresh(
        &self,
        oracle: &OracleSession,
        step: &Step,
        capability: &CapabilityDescriptor,
        outcome: &InvokeOutcome,
    ) -> FailureClass {
        match outcome {
            InvokeOutcome::TimedOut { .. } | InvokeOutcome::Transport { .. } => {
                FailureClass::Mechanical
            }
            InvokeOutcome::Cancelled => FailureClass::Unrecoverable,
            InvokeOutcome::HttpError {
                status,
                description,
                body,
            } => {
                if *status >= 500 {
                    return FailureClass::Mechanical;
                }
                if *status == 429 {
                    return FailureClass::Mechanical;
                }
                let cited = cited_fields(capability, description, body.as_ref());
                if !cited.is_empty() {
                    return FailureClass::ParameterInvalid { fields: cited };
                }
                if looks_like_validation(description) {
                    // Validation language without a recognisable field:
                    // repair every schema field.
                    return FailureClass::ParameterInvalid {
                        fields: capability
                            .input_schema
                            .iter()
                            .map(|f| f.name.clone())
                            .collect(),
                    };
                }
                self.consult_oracle(oracle, step, capability, *status, description)
                    .await
            }
            // A 2xx that carries a structured error is semantic by
            // definition: the parameters type-checked but meant the
            // wrong thing.
            InvokeOutcome::Success { .. } => FailureClass::SemanticMismatch,
        }
    }

    /// One bounded oracle consultation for the ambiguous 4xx cases.
    async fn consult_oracle(
        &self,
        oracle: &OracleSession,
        step: &Step,
        capability: &CapabilityDescriptor,
        status: u16,
        description: &str,
    ) -> FailureClass {
        let schema_fields: Vec<&str> = capability
            .input_schema
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        let prompt = format!(
            r#"A service call failed. Classify the failure.

Step: {} — {}
Capability input fields: {:?}
HTTP status: {status}
Error: {description}

Pick exactly one class:
- "parameter": one or more input fields have wrong values; list them.
- "semantic": the fix requires reasoning over earlier step outputs (unit conversions, derived values).
- "unrecoverable": no parameter change can fix this.

Return ONLY JSON: {{"class": "parameter"|"semantic"|"unrecoverable", "fields": ["name", ...]}}"#,
            step.step_id, step.instruction, schema_fields,
        );

        match oracle
            .generate("analyzer", &prompt, GenerateOptions::structured(128))
            .await
        {
            Ok(completion) => {
                let parsed: Option<Value> =
                    serde_json::from_str(extract_json(&completion.content)).ok();
                match parsed {
                    Some(verdict) => match verdict["class"].as_str() {
                        Some("parameter") => {
                            let fields = verdict["fields"]
                                .as_array()
                                .map(|items| {
                                    items
                                        .iter()
                                        .filter_map(Value::as_str)
                                        .filter(|f| schema_fields.contains(f))
                                        .map(str::to_string)
                                        .collect::<Vec<_>>()
                                })
                                .unwrap_or_default();
                            if fields.is_empty() {
                                FailureClass::ParameterInvalid {
                                    fields: schema_fields.iter().map(|f| f.to_string()).collect(),
                                }
                            } else {
                                FailureClass::ParameterInvalid { fields }
                            }
                        }
                        Some("semantic") => FailureClass::SemanticMismatch,
                        _ => FailureClass::Unrecoverable,
                    },
                    None => {
                        warn!(step_id = %step.step_id, "analyzer oracle output was not JSON");
                        FailureClass::Unrecoverable
                    }
                }
            }
            Err(error) => {
                warn!(step_id = %step.step_id, %error, "analyzer oracle consult failed");
                // Without a classification, a 4xx is not retried blindly.
                FailureClass::Unrecoverable
            }
        }
    }
}

/// Fields of the schema that the error text or body cites by name.
fn cited_fields(
    capability: &CapabilityDescriptor,
    description: &str,
    body: Option<&Value>,
) -> Vec<String> {
    let mut cited = Vec::new();
    let lowered = description.to_lowercase();
    for field in &capability.input_schema {
        let name = field.name.to_lowercase();
        let in_description = lowered.contains(&name);
        let in_body = body
            .and_then(Value::as_object)
            .map(|o| {
                o.get("field").and_then(Value::as_str) == Some(field.name.as_str())
                    || o.get("fields")
                        .and_then(Value::as_array)
                        .is_some_and(|fs| {
                            fs.iter().any(|f| f.as_str() == Some(field.name.as_str()))
                        })
            })
            .unwrap_or(false);
        if in_description || in_body {
            cited.push(field.name.clone());
        }
    }
    cited
}

/// Phrases that mark a 4xx as field validation.
fn looks_like_validation(description: &str) -> bool {
    let lowered = description.to_lowercase();
    ["must be", "invalid", "expected", "required", "missing", "malformed"]
        .iter()
        .any(|marker| lowered.contains(marker))
}
