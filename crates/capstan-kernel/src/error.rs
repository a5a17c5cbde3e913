//! Crate-level error types for `capstan-kernel`.
//!
//! [`OrchestratorError`] is the taxonomy surfaced at the core boundary:
//! every error leaving the orchestrator, the task subsystem, or the
//! gateway maps onto one of its variants. [`KernelError`] composes the
//! sub-module errors for internal propagation together with
//! [`error_stack::Report`] for rich, context-carrying error chains.

use crate::oracle::OracleError;
use crate::plan::PlanError;
use crate::registry::RegistryError;
use crate::store::TaskError;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced at the core boundary.
///
/// Each carries enough context for the gateway to produce a useful
/// diagnosis: the correlating id, the failing step where applicable,
/// and a human-readable message.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum OrchestratorError {
    /// The request is malformed or references an unknown workflow.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The planner could not produce a valid plan within its retry budget.
    #[error("planning failed for request {request_id}: {reason}")]
    PlanningFailed { request_id: Uuid, reason: String },

    /// The catalog does not contain a referenced service or capability.
    #[error("capability '{capability}' on service '{service}' is not available")]
    CapabilityUnavailable { service: String, capability: String },

    /// A required step failed after all four recovery layers.
    #[error("step '{step_id}' failed after recovery: {reason}")]
    StepFailed { step_id: String, reason: String },

    /// A step, plan, or task timeout was exceeded.
    #[error("{scope} timed out after {elapsed_ms}ms")]
    Timeout { scope: String, elapsed_ms: u64 },

    /// The caller requested cancellation.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// An unexpected precondition violation.
    #[error("internal error: {0}")]
    InternalError(String),
}

impl OrchestratorError {
    /// Classify as retry-worthy for queue-level redelivery decisions.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrchestratorError::Timeout { .. })
    }
}

/// Crate-level error type composing every kernel sub-module error.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// A plan invariant violation.
    #[error("Plan error: {0}")]
    Plan(#[from] PlanError),

    /// An oracle failure.
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    /// A registry backend failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// A task store/queue failure.
    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    /// A surfaced orchestration failure.
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// A JSON (de)serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A low-level I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal / untyped error described by a message string.
    #[error("{0}")]
    Internal(String),
}

/// Convenience result alias using [`error_stack::Report`].
///
/// Equivalent to `Result<T, error_stack::Report<KernelError>>`.
pub type KernelResult<T> = Result<T, error_stack::Report<KernelError>>;
