//! Scripted oracle
//!
//! Replays a fixed sequence of completions and records every prompt it
//! was asked. Exhausting the script yields a non-retryable error so a
//! test that issues an unexpected oracle call fails loudly instead of
//! spinning through the retry budget.

use async_trait::async_trait;
use capstan_kernel::oracle::{Completion, GenerateOptions, LlmOracle, OracleError, OracleResult};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// [`LlmOracle`] that replays canned responses in order.
pub struct ScriptedOracle {
    script: Mutex<VecDeque<OracleResult<String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    /// An oracle with an empty script (every call fails loudly).
    pub fn empty() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// An oracle that replays the given completions in order.
    pub fn replaying(responses: impl IntoIterator<Item = &'static str>) -> Self {
        let oracle = Self::empty();
        for response in responses {
            oracle.push_ok(response);
        }
        oracle
    }

    /// Append a successful completion to the script.
    pub fn push_ok(&self, content: &str) {
        self.script.lock().push_back(Ok(content.to_string()));
    }

    /// Append a failure to the script.
    pub fn push_err(&self, error: OracleError) {
        self.script.lock().push_back(Err(error));
    }

    /// Every prompt generated so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// How many oracle calls were made.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }
}

#[async_trait]
impl LlmOracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, _options: GenerateOptions) -> OracleResult<Completion> {
        self.prompts.lock().push(prompt.to_string());
        match self.script.lock().pop_front() {
            Some(Ok(content)) => Ok(Completion {
                content,
                prompt_tokens: (prompt.len() / 4) as u32,
                completion_tokens: 64,
                provider: "scripted".into(),
            }),
            Some(Err(error)) => Err(error),
            None => Err(OracleError::InvalidRequest(
                "scripted oracle exhausted: unexpected call".into(),
            )),
        }
    }
}
