//! Gateway error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use capstan_kernel::error::OrchestratorError;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Gateway-level errors.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("task {0} is already terminal")]
    TaskAlreadyTerminal(Uuid),

    #[error("planner unavailable: {0}")]
    PlannerUnavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<OrchestratorError> for GatewayError {
    fn from(error: OrchestratorError) -> Self {
        match error {
            OrchestratorError::InvalidInput(message) => GatewayError::InvalidRequest(message),
            OrchestratorError::PlanningFailed { reason, .. } => {
                GatewayError::PlannerUnavailable(reason)
            }
            OrchestratorError::CapabilityUnavailable { service, capability } => {
                GatewayError::PlannerUnavailable(format!(
                    "capability '{service}.{capability}' unavailable"
                ))
            }
            OrchestratorError::StepFailed { step_id, reason } => {
                GatewayError::ExecutionFailed(format!("step '{step_id}': {reason}"))
            }
            OrchestratorError::Timeout { scope, elapsed_ms } => {
                GatewayError::ExecutionFailed(format!("{scope} timed out after {elapsed_ms}ms"))
            }
            OrchestratorError::Cancelled(message) => GatewayError::ExecutionFailed(message),
            OrchestratorError::InternalError(message) => GatewayError::Internal(message),
            _ => GatewayError::Internal(error.to_string()),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            GatewayError::InvalidRequest(message) => {
                (StatusCode::BAD_REQUEST, "INVALID_REQUEST", message.clone())
            }
            GatewayError::TaskNotFound(id) => (
                StatusCode::NOT_FOUND,
                "TASK_NOT_FOUND",
                format!("task '{id}' not found"),
            ),
            GatewayError::TaskAlreadyTerminal(id) => (
                StatusCode::CONFLICT,
                "TASK_ALREADY_TERMINAL",
                format!("task '{id}' is already terminal"),
            ),
            GatewayError::PlannerUnavailable(message) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PLANNER_UNAVAILABLE",
                message.clone(),
            ),
            GatewayError::ExecutionFailed(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "EXECUTION_FAILED",
                message.clone(),
            ),
            GatewayError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                message.clone(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
