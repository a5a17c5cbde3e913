//! Workflow planner
//!
//! Pre-authored DAG templates registered under a name. Instantiation
//! applies request parameters through the same template-reference rules
//! as autonomous plans (request scope = the parameter names) and yields
//! an equivalent plan with `mode = workflow`.

use capstan_kernel::error::OrchestratorError;
use capstan_kernel::plan::{Plan, PlanError, PlanMode, Step};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// A named, pre-authored DAG template.
#[derive(Debug, Clone)]
pub struct WorkflowTemplate {
    /// Registry name (URL path segment).
    pub name: String,
    /// Human description.
    pub description: String,
    /// The steps, with parameters that may reference `{{param}}`
    /// request-scope identifiers or earlier steps.
    pub steps: Vec<Step>,
    /// Parameter names the caller must/can supply.
    pub parameters: Vec<WorkflowParameter>,
}

/// One declared workflow parameter.
#[derive(Debug, Clone)]
pub struct WorkflowParameter {
    pub name: String,
    pub required: bool,
    pub default: Option<serde_json::Value>,
}

impl WorkflowParameter {
    /// A required parameter.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    /// An optional parameter with a default.
    pub fn optional(name: impl Into<String>, default: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: Some(default),
        }
    }
}

impl WorkflowTemplate {
    /// Create a template.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            steps: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Declare a parameter.
    pub fn with_parameter(mut self, parameter: WorkflowParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Identifiers available to this template's parameter references.
    fn scope(&self) -> HashSet<String> {
        let mut scope: HashSet<String> = self.parameters.iter().map(|p| p.name.clone()).collect();
        scope.insert("request".to_string());
        scope
    }

    /// Template-level validation, run at registration time.
    fn validate(&self) -> Result<(), PlanError> {
        let probe = Plan {
            steps: self.steps.clone(),
            ..Plan::new(format!("workflow:{}", self.name), PlanMode::Workflow)
        };
        probe.compile()?;
        probe.validate_templates(&self.scope())
    }
}

/// Registry of named workflow templates.
#[derive(Default)]
pub struct WorkflowPlanner {
    templates: RwLock<HashMap<String, WorkflowTemplate>>,
}

impl WorkflowPlanner {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template, validating its DAG and references.
    pub fn register(&self, template: WorkflowTemplate) -> Result<(), OrchestratorError> {
        template
            .validate()
            .map_err(|e| OrchestratorError::InvalidInput(format!(
                "workflow '{}' is invalid: {e}",
                template.name
            )))?;
        info!(workflow = %template.name, steps = template.steps.len(), "workflow registered");
        self.templates
            .write()
            .insert(template.name.clone(), template);
        Ok(())
    }

    /// Names of all registered workflows.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Instantiate a named workflow with the caller's parameters.
    ///
    /// Missing required parameters are rejected; optional parameters
    /// fall back to their defaults. The returned request-scope map is
    /// what Layer-1 resolution substitutes for `{{param}}` references.
    pub fn instantiate(
        &self,
        name: &str,
        supplied: &HashMap<String, serde_json::Value>,
    ) -> Result<(Plan, HashMap<String, serde_json::Value>), OrchestratorError> {
        let templates = self.templates.read();
        let template = templates.get(name).ok_or_else(|| {
            OrchestratorError::InvalidInput(format!("unknown workflow '{name}'"))
        })?;

        let mut scope = HashMap::new();
        for parameter in &template.parameters {
            match supplied.get(&parameter.name) {
                Some(value) => {
                    scope.insert(parameter.name.clone(), value.clone());
                }
                None => match (&parameter.default, parameter.required) {
                    (Some(default), _) => {
                        scope.insert(parameter.name.clone(), default.clone());
                    }
                    (None, true) => {
                        return Err(OrchestratorError::InvalidInput(format!(
                            "workflow '{name}' requires parameter '{}'",
                            parameter.name
                        )));
                    }
                    (None, false) => {}
                },
            }
        }

        let plan = Plan {
            steps: template.steps.clone(),
            ..Plan::new(format!("workflow:{name}"), PlanMode::Workflow)
        };
        // Registration validated the template; compile again so a
        // poisoned registry cannot leak an invalid plan.
        plan.compile()
            .map_err(|e| OrchestratorError::InternalError(e.to_string()))?;
        Ok((plan, scope))
    }
}
