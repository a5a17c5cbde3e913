//! Response synthesis
//!
//! Combines the plan's step outputs into a human-readable answer with
//! one oracle call. Skipped entirely when the caller disabled AI
//! synthesis; a synthesis failure degrades to raw results rather than
//! failing the execution.

use crate::llm::OracleSession;
use capstan_kernel::oracle::GenerateOptions;
use capstan_kernel::result::StepResult;
use tracing::warn;

/// LLM-backed synthesiser.
#[derive(Debug, Clone, Copy, Default)]
pub struct Synthesizer;

impl Synthesizer {
    /// Create a synthesiser.
    pub fn new() -> Self {
        Self
    }

    /// Produce the final response text, or `None` when synthesis
    /// failed (callers fall back to raw step results).
    pub async fn synthesize(
        &self,
        oracle: &OracleSession,
        original_request: &str,
        step_results: &[StepResult],
    ) -> Option<String> {
        let mut outputs = String::new();
        for result in step_results.iter().filter(|r| r.success) {
            if let Some(data) = &result.data {
                outputs.push_str(&format!(
                    "### {} ({})\n{}\n\n",
                    result.step_id, result.service_name, data
                ));
            }
        }
        if outputs.is_empty() {
            outputs.push_str("(no step produced output)\n");
        }

        let prompt = format!(
            r#"You are the synthesis component of a service orchestration runtime.
Combine the step outputs below into a single coherent answer to the user's request.
Be accurate and concise; do not invent data that is not in the outputs.

User request: {original_request}

Step outputs:

{outputs}"#
        );

        match oracle
            .generate("synthesizer", &prompt, GenerateOptions::structured(1024))
            .await
        {
            Ok(completion) => Some(completion.content),
            Err(error) => {
                warn!(%error, "synthesis failed; returning raw results");
                None
            }
        }
    }
}
