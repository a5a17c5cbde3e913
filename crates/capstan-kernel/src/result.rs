//! Step and execution outcomes

use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Outcome of executing one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// The step this result belongs to.
    pub step_id: String,
    /// Service that was invoked.
    pub service_name: String,
    /// Whether the invocation ultimately succeeded.
    pub success: bool,
    /// Decoded response payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Human-readable failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall-clock duration of the step including recovery attempts.
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// HTTP status of the final invocation attempt, when one was made.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Number of retries the recovery pipeline performed (0 = first try).
    #[serde(default)]
    pub retry_count: u32,
    /// Set when the step never ran because an upstream dependency failed.
    #[serde(default)]
    pub skipped: bool,
}

impl StepResult {
    /// A successful result carrying a decoded payload.
    pub fn success(
        step_id: impl Into<String>,
        service_name: impl Into<String>,
        data: serde_json::Value,
        duration: Duration,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service_name: service_name.into(),
            success: true,
            data: Some(data),
            error: None,
            duration,
            status_code: Some(200),
            retry_count: 0,
            skipped: false,
        }
    }

    /// A failed result with a diagnosis.
    pub fn failure(
        step_id: impl Into<String>,
        service_name: impl Into<String>,
        error: impl Into<String>,
        duration: Duration,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service_name: service_name.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            duration,
            status_code: None,
            retry_count: 0,
            skipped: false,
        }
    }

    /// A skipped result for a step that never started.
    pub fn skipped(
        step_id: impl Into<String>,
        service_name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            service_name: service_name.into(),
            success: false,
            data: None,
            error: Some(format!("skipped: {}", reason.into())),
            duration: Duration::ZERO,
            status_code: None,
            retry_count: 0,
            skipped: true,
        }
    }

    /// Record the HTTP status of the final attempt.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    /// Record how many retries were needed.
    pub fn with_retries(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }
}

/// The view returned by the orchestration endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Correlates logs, events, and the HTTP response.
    pub request_id: Uuid,
    /// The request as submitted.
    pub original_request: String,
    /// The plan that was executed.
    pub execution_plan: Plan,
    /// One result per executed (or skipped) step, in completion order.
    pub step_results: Vec<StepResult>,
    /// Present when the synthesiser ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synthesized_response: Option<String>,
    /// Total wall-clock time.
    #[serde(with = "duration_ms")]
    pub execution_time: Duration,
    /// Distinct service names of successful steps, in first-use order.
    pub tools_used: Vec<String>,
    /// Fraction of required steps that succeeded, in `[0, 1]`.
    pub confidence: f64,
    /// Whether every required step succeeded.
    pub success: bool,
    /// Completion instant.
    pub completed_at: DateTime<Utc>,
}

impl ExecutionResult {
    /// Assemble the result view from a finished execution.
    ///
    /// `confidence` is the fraction of required steps that succeeded;
    /// a plan with no required steps (including the empty plan) scores
    /// 1.0.
    pub fn assemble(
        request_id: Uuid,
        plan: Plan,
        step_results: Vec<StepResult>,
        synthesized_response: Option<String>,
        execution_time: Duration,
    ) -> Self {
        let required_total = plan.steps.iter().filter(|s| s.required).count();
        let required_ok = plan
            .steps
            .iter()
            .filter(|s| s.required)
            .filter(|s| {
                step_results
                    .iter()
                    .any(|r| r.step_id == s.step_id && r.success)
            })
            .count();
        let confidence = if required_total == 0 {
            1.0
        } else {
            required_ok as f64 / required_total as f64
        };

        let mut tools_used = Vec::new();
        for result in &step_results {
            if result.success && !tools_used.contains(&result.service_name) {
                tools_used.push(result.service_name.clone());
            }
        }

        Self {
            request_id,
            original_request: plan.original_request.clone(),
            execution_plan: plan,
            step_results,
            synthesized_response,
            execution_time,
            tools_used,
            confidence,
            success: required_ok == required_total,
            completed_at: Utc::now(),
        }
    }
}

/// Serialise a [`Duration`] as integer milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
