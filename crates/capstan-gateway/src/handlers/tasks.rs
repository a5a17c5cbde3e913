//! Asynchronous task endpoints

use crate::error::{GatewayError, GatewayResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use capstan_kernel::task::{Task, TaskStatus, TraceContext};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

/// Body of `POST /tasks`.
#[derive(Debug, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

/// Response of `POST /tasks` (202).
#[derive(Debug, Serialize)]
pub struct SubmitTaskResponse {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub status_url: String,
}

fn capture_trace_context(headers: &HeaderMap) -> Option<TraceContext> {
    let traceparent = headers
        .get(capstan_monitoring::TRACEPARENT)?
        .to_str()
        .ok()?
        .to_string();
    let tracestate = headers
        .get(capstan_monitoring::TRACESTATE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    Some(TraceContext {
        traceparent,
        tracestate,
    })
}

/// `POST /tasks` — persist, enqueue, 202.
pub async fn submit_task(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SubmitTaskRequest>,
) -> GatewayResult<(StatusCode, Json<SubmitTaskResponse>)> {
    if body.task_type.trim().is_empty() {
        return Err(GatewayError::InvalidRequest("'type' must not be empty".into()));
    }

    let mut task = Task::new(&body.task_type, body.input);
    if let Some(trace) = capture_trace_context(&headers) {
        task = task.with_trace_context(trace);
    }
    let task_id = task.task_id;

    state
        .store
        .put(task)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;
    state
        .queue
        .enqueue(task_id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    info!(task_id = %task_id, task_type = %body.task_type, "task accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitTaskResponse {
            task_id,
            status: TaskStatus::Queued,
            status_url: format!("/tasks/{task_id}"),
        }),
    ))
}

/// `GET /tasks/{id}` — the full task entity.
pub async fn get_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<Json<Task>> {
    let task = state
        .store
        .get(id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .ok_or(GatewayError::TaskNotFound(id))?;
    Ok(Json(task))
}

/// `POST /tasks/{id}/cancel` — 409 when already terminal.
pub async fn cancel_task(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> GatewayResult<Json<serde_json::Value>> {
    let current = state
        .store
        .get(id)
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?
        .ok_or(GatewayError::TaskNotFound(id))?;
    if current.is_terminal() {
        return Err(GatewayError::TaskAlreadyTerminal(id));
    }

    let now = Utc::now();
    let updated = state
        .store
        .update(
            id,
            Box::new(move |task| {
                if !task.is_terminal() {
                    task.mark_cancelled(now);
                }
            }),
        )
        .await
        .map_err(|e| GatewayError::Internal(e.to_string()))?;

    // A terminal transition that raced us wins; report the conflict.
    if updated.status != TaskStatus::Cancelled {
        return Err(GatewayError::TaskAlreadyTerminal(id));
    }
    info!(task_id = %id, "task cancelled");
    Ok(Json(json!({ "task_id": id, "status": "cancelled" })))
}
