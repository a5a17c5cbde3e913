//! LLM oracle contract
//!
//! The LLM is the sole non-deterministic dependency of the core. It is
//! modelled as a single-operation oracle with a fixed request/response
//! contract; concrete providers live outside the core and implement
//! [`LlmOracle`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Tuning knobs for one generation call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature; planners use low values for structured output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion token budget.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Provider-interpreted model alias (e.g. `"planning"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_alias: Option<String>,
}

impl GenerateOptions {
    /// Options for structured-output calls (low temperature).
    pub fn structured(max_tokens: u32) -> Self {
        Self {
            temperature: Some(0.2),
            max_tokens: Some(max_tokens),
            model_alias: None,
        }
    }
}

/// The oracle's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text.
    pub content: String,
    /// Tokens consumed by the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Which provider answered.
    pub provider: String,
}

/// Why a generation call failed.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum OracleError {
    /// Provider asked us to slow down; honour `retry_after` if present.
    #[error("rate limited{}", .retry_after.map(|d| format!(" (retry after {}ms)", d.as_millis())).unwrap_or_default())]
    RateLimited { retry_after: Option<Duration> },

    /// The request itself was rejected (4xx semantics); retrying the
    /// identical request will not help.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transient provider or network failure (5xx semantics).
    #[error("transient provider failure: {0}")]
    Transient(String),
}

impl OracleError {
    /// Whether a retry of the same request can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OracleError::RateLimited { .. } | OracleError::Transient(_)
        )
    }
}

/// Result alias for oracle calls.
pub type OracleResult<T> = Result<T, OracleError>;

/// The LLM treated as an external, fallible black box.
#[async_trait]
pub trait LlmOracle: Send + Sync {
    /// Provider name, for events and the completion record.
    fn name(&self) -> &str;

    /// Generate a completion for the prompt.
    async fn generate(&self, prompt: &str, options: GenerateOptions) -> OracleResult<Completion>;
}
