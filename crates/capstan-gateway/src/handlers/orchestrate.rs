//! Synchronous orchestration endpoints

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use capstan_foundation::orchestrator::OrchestrateOptions;
use capstan_kernel::result::ExecutionResult;
use capstan_monitoring::{SpanContext, W3cPropagator};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::info;

/// Body of `POST /orchestrate/natural`.
#[derive(Debug, Deserialize)]
pub struct NaturalRequest {
    pub request: String,
    #[serde(default = "default_synthesis")]
    pub ai_synthesis: bool,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Body of `POST /orchestrate/workflow/{name}`.
#[derive(Debug, Deserialize)]
pub struct WorkflowRequest {
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_synthesis")]
    pub ai_synthesis: bool,
}

fn default_synthesis() -> bool {
    true
}

/// Extract the caller's W3C context from the request headers.
pub fn extract_trace(headers: &HeaderMap) -> Option<SpanContext> {
    let mut carrier = HashMap::new();
    for key in [
        capstan_monitoring::TRACEPARENT,
        capstan_monitoring::TRACESTATE,
    ] {
        if let Some(value) = headers.get(key).and_then(|v| v.to_str().ok()) {
            carrier.insert(key.to_string(), value.to_string());
        }
    }
    W3cPropagator::new().extract(&carrier)
}

/// `POST /orchestrate/natural`
pub async fn orchestrate_natural(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<NaturalRequest>,
) -> GatewayResult<Json<ExecutionResult>> {
    if body.request.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("'request' must not be empty".into()));
    }
    if state.catalog.is_empty() {
        return Err(GatewayError::PlannerUnavailable(
            "no services registered in the catalog".into(),
        ));
    }
    info!(metadata = ?body.metadata, "natural orchestration request");

    let options = OrchestrateOptions {
        ai_synthesis: body.ai_synthesis,
        trace: extract_trace(&headers),
        ..OrchestrateOptions::default()
    };
    let result = state
        .orchestrator
        .orchestrate_natural(&body.request, options)
        .await?;
    Ok(Json(result))
}

/// `POST /orchestrate/workflow/{name}`
pub async fn orchestrate_workflow(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(body): Json<WorkflowRequest>,
) -> GatewayResult<Json<ExecutionResult>> {
    let options = OrchestrateOptions {
        ai_synthesis: body.ai_synthesis,
        trace: extract_trace(&headers),
        ..OrchestrateOptions::default()
    };
    let result = state
        .orchestrator
        .orchestrate_workflow(&name, &body.parameters, options)
        .await?;
    Ok(Json(result))
}
