//! # Capstan Kernel
//!
//! Domain model and contracts for the Capstan orchestration runtime.
//!
//! The kernel holds everything the rest of the workspace agrees on:
//!
//! - the data model — services and capabilities ([`service`]), the plan
//!   IR with its template parameters ([`plan`], [`template`]), execution
//!   outcomes ([`result`]), and async tasks ([`task`]);
//! - the contracts for every external collaborator — the LLM oracle
//!   ([`oracle`]), the registry backend ([`registry`]), the task store
//!   and queue ([`store`]), and observability ([`telemetry`]);
//! - the error taxonomy surfaced at the core boundary ([`error`]);
//! - runtime configuration ([`config`]) and the injectable clock
//!   ([`clock`]).
//!
//! Concrete implementations live in `capstan-foundation`; the kernel
//! never depends on it.

pub mod clock;
pub mod config;
pub mod error;
pub mod oracle;
pub mod plan;
pub mod registry;
pub mod result;
pub mod service;
pub mod store;
pub mod task;
pub mod telemetry;
pub mod template;

pub use clock::{Clock, SystemClock};
pub use config::{RunMode, RuntimeConfig};
pub use error::{KernelError, KernelResult, OrchestratorError};
pub use oracle::{Completion, GenerateOptions, LlmOracle, OracleError, OracleResult};
pub use plan::{Plan, PlanError, PlanGraph, PlanMode, RetryPolicy, Step};
pub use registry::{KvEvent, KvEventStream, RegistryBackend, RegistryError, RegistryResult};
pub use result::{ExecutionResult, StepResult};
pub use service::{
    CapabilityDescriptor, FieldSchema, SemanticType, ServiceDescriptor, ServiceKind,
};
pub use store::{
    ProgressSink, TaskError, TaskFilter, TaskHandler, TaskMutator, TaskQueue, TaskResult,
    TaskStore,
};
pub use task::{Task, TaskProgress, TaskStatus, TraceContext};
pub use telemetry::{EventSink, NoopSink, ObservabilityEvent, RecordingSink, SharedEventSink};
pub use template::{lookup_path, ParamValue, TemplateRef, TemplateSegment};
