//! Built-in `orchestrate` task handler
//!
//! Runs the full natural-language pipeline asynchronously, translating
//! the executor's serialised step completions into task progress
//! updates.

use crate::executor::StepCompletion;
use crate::orchestrator::{OrchestrateOptions, Orchestrator};
use capstan_kernel::error::OrchestratorError;
use capstan_kernel::store::{ProgressSink, TaskHandler};
use capstan_kernel::task::{Task, TaskProgress};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Input shape for `orchestrate` tasks.
#[derive(Debug, Deserialize)]
struct OrchestrateInput {
    request: String,
    #[serde(default = "default_synthesis")]
    ai_synthesis: bool,
}

fn default_synthesis() -> bool {
    true
}

/// Handler for `task.type == "orchestrate"`.
pub struct OrchestrateHandler {
    orchestrator: Arc<Orchestrator>,
}

impl OrchestrateHandler {
    /// Create the handler.
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait::async_trait]
impl TaskHandler for OrchestrateHandler {
    fn task_type(&self) -> &str {
        "orchestrate"
    }

    async fn handle(
        &self,
        task: &Task,
        progress: &dyn ProgressSink,
        cancel: CancellationToken,
    ) -> Result<serde_json::Value, OrchestratorError> {
        let input: OrchestrateInput = serde_json::from_value(task.input.clone())
            .map_err(|e| OrchestratorError::InvalidInput(format!("bad task input: {e}")))?;

        let (tx, mut rx) = mpsc::channel::<StepCompletion>(32);
        let options = OrchestrateOptions {
            ai_synthesis: input.ai_synthesis,
            trace: None, // the worker span is the trace root here
            cancel: cancel.clone(),
            completions: Some(tx),
        };

        let execution = self
            .orchestrator
            .orchestrate_natural(&input.request, options);
        tokio::pin!(execution);

        // Drive the execution and the progress stream together so
        // updates land while steps are still completing.
        let mut channel_open = true;
        let result = loop {
            tokio::select! {
                completion = rx.recv(), if channel_open => {
                    match completion {
                        Some(completion) => {
                            progress
                                .report(
                                    TaskProgress::at_step(
                                        completion.ordinal,
                                        completion.total,
                                        &completion.step_id,
                                    )
                                    .with_message(format!(
                                        "{} on {} ({})",
                                        if completion.success { "completed" } else { "failed" },
                                        completion.service_name,
                                        format_duration_ms(completion.duration),
                                    )),
                                )
                                .await;
                        }
                        None => channel_open = false,
                    }
                }
                result = &mut execution => break result,
            }
        };

        // Drain any completions that raced the final result.
        while let Ok(completion) = rx.try_recv() {
            progress
                .report(TaskProgress::at_step(
                    completion.ordinal,
                    completion.total,
                    &completion.step_id,
                ))
                .await;
        }

        let result = result?;
        if !result.success {
            return Err(OrchestratorError::StepFailed {
                step_id: result
                    .step_results
                    .iter()
                    .find(|r| !r.success)
                    .map(|r| r.step_id.clone())
                    .unwrap_or_default(),
                reason: "one or more required steps failed".into(),
            });
        }
        serde_json::to_value(&result)
            .map_err(|e| OrchestratorError::InternalError(format!("result serialisation: {e}")))
    }
}

fn format_duration_ms(duration: std::time::Duration) -> String {
    format!("{}ms", duration.as_millis())
}
