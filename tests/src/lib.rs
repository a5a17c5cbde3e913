//! Testing utilities for the Capstan runtime.
//!
//! - [`oracle`] — a scripted [`capstan_kernel::oracle::LlmOracle`] that
//!   replays canned completions and records every prompt;
//! - [`services`] — axum-backed mock capability services bound to
//!   ephemeral ports, recording every invocation body;
//! - [`runtime`] — a fully wired in-process runtime (registry, catalog,
//!   executor, orchestrator, task subsystem) for end-to-end scenarios.

pub mod oracle;
pub mod runtime;
pub mod services;

pub use oracle::ScriptedOracle;
pub use runtime::TestRuntime;
pub use services::MockService;
