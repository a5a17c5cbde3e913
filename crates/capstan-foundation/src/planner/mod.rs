//! Plan generation: natural-language and pre-authored workflows.

pub mod natural;
pub mod workflow;

pub use natural::{request_scope, NaturalPlanner, PlannerConfig};
pub use workflow::{WorkflowParameter, WorkflowPlanner, WorkflowTemplate};
