//! Async task subsystem end-to-end: submit → worker → progress →
//! terminal state, over the full orchestration pipeline.

use capstan_foundation::tasks::{OrchestrateHandler, WorkerPool, WorkerPoolConfig};
use capstan_kernel::clock::SystemClock;
use capstan_kernel::service::{
    CapabilityDescriptor, FieldSchema, SemanticType, ServiceDescriptor, ServiceKind,
};
use capstan_kernel::store::{TaskQueue, TaskStore};
use capstan_kernel::task::{Task, TaskStatus, TraceContext};
use capstan_testing::{MockService, ScriptedOracle, TestRuntime};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn weather_descriptor(address: &str) -> ServiceDescriptor {
    ServiceDescriptor::new("wt-1", "weather-tool-v2", ServiceKind::Tool, address).with_capability(
        CapabilityDescriptor::new("get_current_weather", "/api/capabilities/weather")
            .with_summary("Current weather")
            .with_field(FieldSchema::required("lat", SemanticType::Number))
            .with_field(FieldSchema::required("lon", SemanticType::Number)),
    )
}

async fn wait_for_status(store: &dyn TaskStore, id: Uuid, status: TaskStatus) -> Task {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(task) = store.get(id).await.unwrap() {
                if task.status == status {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task reached expected status")
}

#[tokio::test]
async fn orchestrate_task_completes_with_progress() {
    let weather = MockService::start(vec![(
        "/api/capabilities/weather",
        MockService::ok(json!({"temp_c": 18.5})),
    )])
    .await;

    let oracle = Arc::new(ScriptedOracle::replaying([r#"{"steps": [{
        "step_id": "w", "service_name": "weather-tool-v2",
        "capability_name": "get_current_weather",
        "parameters": {"lat": "48.85", "lon": "2.35"}
    }]}"#]));
    let runtime = TestRuntime::with_oracle(oracle).await;
    runtime.register(weather_descriptor(&weather.address)).await;

    let mut pool = WorkerPool::new(
        runtime.store.clone() as Arc<dyn TaskStore>,
        runtime.queue.clone() as Arc<dyn TaskQueue>,
        Arc::new(SystemClock),
        runtime.sink.clone(),
        WorkerPoolConfig {
            worker_count: 2,
            dequeue_wait: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(50),
            handler_timeout: Duration::from_secs(10),
            shutdown_budget: Duration::from_secs(1),
        },
    );
    pool.register_handler(Arc::new(OrchestrateHandler::new(Arc::clone(
        &runtime.orchestrator,
    ))));
    let handle = pool.start();

    let task = Task::new(
        "orchestrate",
        json!({"request": "Weather in Paris", "ai_synthesis": false}),
    )
    .with_trace_context(TraceContext {
        traceparent: "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01".into(),
        tracestate: None,
    });
    let id = task.task_id;
    runtime.store.put(task).await.unwrap();
    runtime.queue.enqueue(id).await.unwrap();

    let done = wait_for_status(runtime.store.as_ref(), id, TaskStatus::Completed).await;
    let result = done.result.expect("completed task carries the result");
    assert_eq!(result["success"], json!(true));
    assert_eq!(result["tools_used"], json!(["weather-tool-v2"]));

    // Progress reached the final step before completion.
    let progress = done.progress.expect("progress was reported");
    assert_eq!(progress.total_steps, 1);
    assert_eq!(progress.current_step, 1);

    handle.shutdown().await;
    runtime.shutdown();
}

#[tokio::test]
async fn failed_orchestration_fails_the_task() {
    // No services registered: planning fails, so the task must fail.
    let oracle = Arc::new(ScriptedOracle::empty());
    let runtime = TestRuntime::with_oracle(oracle).await;

    let mut pool = WorkerPool::new(
        runtime.store.clone() as Arc<dyn TaskStore>,
        runtime.queue.clone() as Arc<dyn TaskQueue>,
        Arc::new(SystemClock),
        runtime.sink.clone(),
        WorkerPoolConfig {
            worker_count: 1,
            dequeue_wait: Duration::from_millis(50),
            heartbeat_interval: Duration::from_millis(50),
            handler_timeout: Duration::from_secs(5),
            shutdown_budget: Duration::from_secs(1),
        },
    );
    pool.register_handler(Arc::new(OrchestrateHandler::new(Arc::clone(
        &runtime.orchestrator,
    ))));
    let handle = pool.start();

    let task = Task::new("orchestrate", json!({"request": "anything"}));
    let id = task.task_id;
    runtime.store.put(task).await.unwrap();
    runtime.queue.enqueue(id).await.unwrap();

    let failed = wait_for_status(runtime.store.as_ref(), id, TaskStatus::Failed).await;
    assert!(failed.error.unwrap().contains("planning failed"));

    handle.shutdown().await;
    runtime.shutdown();
}

#[tokio::test]
async fn duplicate_submissions_are_independent_tasks() {
    let oracle = Arc::new(ScriptedOracle::empty());
    let runtime = TestRuntime::with_oracle(oracle).await;

    let body = json!({"request": "same body"});
    let first = Task::new("orchestrate", body.clone());
    let second = Task::new("orchestrate", body);
    assert_ne!(first.task_id, second.task_id);

    runtime.store.put(first.clone()).await.unwrap();
    runtime.store.put(second.clone()).await.unwrap();
    runtime.queue.enqueue(first.task_id).await.unwrap();
    runtime.queue.enqueue(second.task_id).await.unwrap();

    assert_eq!(runtime.queue.depth().await, 2);
    let a = runtime.queue.dequeue(Duration::from_millis(10)).await.unwrap();
    let b = runtime.queue.dequeue(Duration::from_millis(10)).await.unwrap();
    assert_eq!(a, Some(first.task_id));
    assert_eq!(b, Some(second.task_id));
    runtime.shutdown();
}
