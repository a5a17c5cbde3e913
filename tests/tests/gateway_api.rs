//! HTTP surface tests via in-process tower services.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use capstan_gateway::server::GatewayServer;
use capstan_gateway::state::AppState;
use capstan_kernel::store::{TaskQueue, TaskStore};
use capstan_kernel::task::TaskStatus;
use capstan_testing::{ScriptedOracle, TestRuntime};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt;

async fn app_state(runtime: &TestRuntime) -> AppState {
    AppState {
        orchestrator: Arc::clone(&runtime.orchestrator),
        store: runtime.store.clone() as Arc<dyn TaskStore>,
        queue: runtime.queue.clone() as Arc<dyn TaskQueue>,
        catalog: Arc::clone(&runtime.catalog),
    }
}

async fn body_json(body: Body) -> Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_catalog_and_queue() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let app = GatewayServer::build_app(app_state(&runtime).await);

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["catalog"]["services"], json!(0));
    assert_eq!(body["queue_depth"], json!(0));
    runtime.shutdown();
}

#[tokio::test]
async fn natural_orchestration_rejects_empty_catalog_with_503() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let app = GatewayServer::build_app(app_state(&runtime).await);

    let response = app
        .oneshot(post_json(
            "/orchestrate/natural",
            json!({"request": "What is the weather in Paris?"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], json!("PLANNER_UNAVAILABLE"));
    runtime.shutdown();
}

#[tokio::test]
async fn natural_orchestration_rejects_empty_request_with_400() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let app = GatewayServer::build_app(app_state(&runtime).await);

    let response = app
        .oneshot(post_json("/orchestrate/natural", json!({"request": "  "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    runtime.shutdown();
}

#[tokio::test]
async fn unknown_workflow_returns_400() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let app = GatewayServer::build_app(app_state(&runtime).await);

    let response = app
        .oneshot(post_json(
            "/orchestrate/workflow/not-a-workflow",
            json!({"parameters": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    runtime.shutdown();
}

#[tokio::test]
async fn task_submission_lifecycle() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let state = app_state(&runtime).await;
    let app = GatewayServer::build_app(state.clone());

    // Submit with a traceparent; expect 202 and a status URL.
    let submit = Request::builder()
        .method("POST")
        .uri("/tasks")
        .header("content-type", "application/json")
        .header(
            "traceparent",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
        )
        .body(Body::from(
            json!({"type": "orchestrate", "input": {"request": "hello"}}).to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(submit).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], json!("queued"));
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(body["status_url"], json!(format!("/tasks/{task_id}")));

    // The submission trace context is persisted with the task.
    let stored = runtime
        .store
        .get(task_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(stored.trace_context.is_some());
    assert_eq!(runtime.queue.depth().await, 1);

    // Poll it.
    let response = app
        .clone()
        .oneshot(
            Request::get(format!("/tasks/{task_id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], json!("queued"));

    // Cancel it; then a second cancel conflicts.
    let response = app
        .clone()
        .oneshot(post_json(&format!("/tasks/{task_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response.into_body()).await;
    assert_eq!(body["status"], json!("cancelled"));

    let response = app
        .clone()
        .oneshot(post_json(&format!("/tasks/{task_id}/cancel"), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let stored = runtime
        .store
        .get(task_id.parse().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, TaskStatus::Cancelled);
    runtime.shutdown();
}

#[tokio::test]
async fn unknown_task_returns_404() {
    let runtime = TestRuntime::with_oracle(Arc::new(ScriptedOracle::empty())).await;
    let app = GatewayServer::build_app(app_state(&runtime).await);

    let response = app
        .oneshot(
            Request::get(format!("/tasks/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    runtime.shutdown();
}
