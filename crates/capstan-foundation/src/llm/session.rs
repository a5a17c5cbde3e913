//! Oracle session
//!
//! Every oracle call in the core goes through an [`OracleSession`]:
//!
//! - transient failures and rate limits retry with capped exponential
//!   backoff (honouring `retry-after` when the provider supplies one);
//! - completions are memoised by `(component, prompt)` fingerprint for
//!   the lifetime of the session — one session spans one plan
//!   execution, so identical prompts within a recovery episode are
//!   issued exactly once;
//! - when LLM debug capture is enabled, every exchange is recorded.

use capstan_kernel::oracle::{Completion, GenerateOptions, LlmOracle, OracleError, OracleResult};
use capstan_monitoring::LlmDebugCapture;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A retrying, memoising view of the oracle, scoped to one execution.
pub struct OracleSession {
    oracle: Arc<dyn LlmOracle>,
    max_attempts: u32,
    backoff_base: Duration,
    memo: DashMap<String, Completion>,
    capture: Option<Arc<LlmDebugCapture>>,
}

impl OracleSession {
    /// Create a session.
    pub fn new(oracle: Arc<dyn LlmOracle>, max_attempts: u32, backoff_base: Duration) -> Self {
        Self {
            oracle,
            max_attempts: max_attempts.max(1),
            backoff_base,
            memo: DashMap::new(),
            capture: None,
        }
    }

    /// Attach the debug capture store.
    pub fn with_capture(mut self, capture: Arc<LlmDebugCapture>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Provider name, for events.
    pub fn provider_name(&self) -> &str {
        self.oracle.name()
    }

    /// Generate with retry and memoisation.
    ///
    /// `component` labels the caller (`planner`, `resolver`, `analyzer`,
    /// `synthesizer`) and partitions the memo so two components asking
    /// the same literal question do not alias.
    pub async fn generate(
        &self,
        component: &str,
        prompt: &str,
        options: GenerateOptions,
    ) -> OracleResult<Completion> {
        let fingerprint = Self::fingerprint(component, prompt);
        if let Some(hit) = self.memo.get(&fingerprint) {
            debug!(component, "oracle memo hit");
            return Ok(hit.clone());
        }

        let mut last_error = None;
        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let wait = match &last_error {
                    Some(OracleError::RateLimited {
                        retry_after: Some(after),
                    }) => *after,
                    _ => self.backoff_base * 2u32.saturating_pow(attempt - 1),
                };
                tokio::time::sleep(wait).await;
            }
            match self.oracle.generate(prompt, options.clone()).await {
                Ok(completion) => {
                    if let Some(capture) = &self.capture {
                        capture.record(component, prompt, &completion.content, true);
                    }
                    self.memo.insert(fingerprint, completion.clone());
                    return Ok(completion);
                }
                Err(error) => {
                    if let Some(capture) = &self.capture {
                        capture.record(component, prompt, &error.to_string(), false);
                    }
                    if !error.is_retryable() || attempt + 1 == self.max_attempts {
                        return Err(error);
                    }
                    warn!(component, attempt, %error, "oracle call failed; retrying");
                    last_error = Some(error);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| OracleError::Transient("retry loop exhausted without error".into())))
    }

    fn fingerprint(component: &str, prompt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(component.as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Extract JSON from an oracle response that may contain markdown fences.
pub fn extract_json(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            return after[..end].trim();
        }
    }
    trimmed
}
