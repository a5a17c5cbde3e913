//! # Capstan Foundation
//!
//! Concrete implementations of the Capstan orchestration runtime:
//!
//! - [`registry`] — the registry client protocol and the in-memory
//!   KV-with-TTL backend;
//! - [`catalog`] — the refresh-subscribed, capability-indexed service
//!   catalog that feeds the planner;
//! - [`schema`] — the compiled-schema cache and the deterministic value
//!   coercer (Layer 2);
//! - [`capability`] — the HTTP capability invoker with trace
//!   propagation, timeouts, and cancellation;
//! - [`llm`] — the retrying, memoising oracle session;
//! - [`planner`] — natural-language and workflow plan generation;
//! - [`resolver`] — the four-layer parameter resolution pipeline;
//! - [`analyzer`] — failure classification for the recovery pipeline;
//! - [`executor`] — the ready-wave DAG executor;
//! - [`synthesizer`] — final response synthesis;
//! - [`tasks`] — the durable task store, queue, worker pool, and
//!   janitor;
//! - [`orchestrator`] — the facade the gateway and task handler call.
//!
//! Contracts (traits, domain types, errors) live in `capstan-kernel`;
//! this crate implements them and never redefines them.

pub mod analyzer;
pub mod capability;
pub mod catalog;
pub mod executor;
pub mod llm;
pub mod orchestrator;
pub mod planner;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod synthesizer;
pub mod tasks;

pub use analyzer::{ErrorAnalyzer, FailureClass};
pub use capability::{CapabilityClient, InvokeOutcome};
pub use catalog::{CatalogSnapshot, ServiceCatalog};
pub use executor::{DagExecutor, ExecutionOutcome, ExecutorConfig, StepCompletion};
pub use llm::{OpenAiOracle, OracleSession};
pub use orchestrator::{OrchestrateOptions, Orchestrator};
pub use planner::{NaturalPlanner, PlannerConfig, WorkflowParameter, WorkflowPlanner, WorkflowTemplate};
pub use resolver::{FieldIssue, ParameterResolver, ResolutionScope, ResolverConfig};
pub use schema::{coerce, CoercionError, SchemaCache};
pub use synthesizer::Synthesizer;
pub use tasks::{
    Janitor, JanitorConfig, MemoryTaskQueue, MemoryTaskStore, OrchestrateHandler, WorkerPool,
    WorkerPoolConfig, WorkerPoolHandle,
};
