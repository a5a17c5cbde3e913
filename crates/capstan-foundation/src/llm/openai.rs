//! OpenAI-compatible oracle adapter
//!
//! Minimal chat-completions client satisfying the kernel's
//! [`LlmOracle`] contract. Any OpenAI-compatible endpoint works; the
//! base URL, API key, and model come from the environment
//! (`CAPSTAN_LLM_BASE_URL`, `CAPSTAN_LLM_API_KEY`, `CAPSTAN_LLM_MODEL`).
//! Failure classes map from HTTP status: 429 → rate-limited (honouring
//! `retry-after`), other 4xx → invalid request, 5xx/network → transient.

use async_trait::async_trait;
use capstan_kernel::oracle::{Completion, GenerateOptions, LlmOracle, OracleError, OracleResult};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

/// OpenAI-compatible chat-completions oracle.
pub struct OpenAiOracle {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAiOracle {
    /// Create an adapter for the given endpoint.
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }

    /// Construct from `CAPSTAN_LLM_*` environment variables.
    ///
    /// Returns `None` when no base URL is configured — callers decide
    /// whether a missing oracle is fatal for their mode.
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("CAPSTAN_LLM_BASE_URL").ok()?;
        let api_key = std::env::var("CAPSTAN_LLM_API_KEY").ok();
        let model =
            std::env::var("CAPSTAN_LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());
        Some(Self::new(base_url, api_key, model))
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Usage,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    content: Option<String>,
}

#[derive(Deserialize, Default)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[async_trait]
impl LlmOracle for OpenAiOracle {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    async fn generate(&self, prompt: &str, options: GenerateOptions) -> OracleResult<Completion> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );
        let mut body = json!({
            "model": options.model_alias.as_deref().unwrap_or(&self.model),
            "messages": [{"role": "user", "content": prompt}],
        });
        if let Some(temperature) = options.temperature {
            body["temperature"] = json!(temperature);
        }
        if let Some(max_tokens) = options.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| OracleError::Transient(e.to_string()))?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(OracleError::RateLimited { retry_after });
        }
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::InvalidRequest(format!("{status}: {body}")));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Transient(format!("{status}: {body}")));
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Transient(format!("undecodable response: {e}")))?;
        let content = decoded
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .ok_or_else(|| OracleError::Transient("empty completion".into()))?;
        Ok(Completion {
            content,
            prompt_tokens: decoded.usage.prompt_tokens,
            completion_tokens: decoded.usage.completion_tokens,
            provider: if decoded.model.is_empty() {
                self.name().to_string()
            } else {
                decoded.model
            },
        })
    }
}
