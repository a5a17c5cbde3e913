//! Health endpoint

use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// `GET /health` — liveness plus a catalog/queue summary.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.catalog.snapshot();
    Json(json!({
        "status": "ok",
        "service": "capstan-gateway",
        "catalog": {
            "services": snapshot.len(),
            "version": snapshot.version,
        },
        "queue_depth": state.queue.depth().await,
    }))
}
