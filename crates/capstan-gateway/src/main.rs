//! Capstan process entry point.
//!
//! Bootstraps the runtime from environment configuration and runs the
//! roles `GOMIND_MODE` selects: the HTTP gateway (`api`), the task
//! worker pool (`worker`), or both (empty).

use anyhow::Context;
use capstan_foundation::capability::CapabilityClient;
use capstan_foundation::catalog::ServiceCatalog;
use capstan_foundation::executor::{DagExecutor, ExecutorConfig};
use capstan_foundation::llm::OpenAiOracle;
use capstan_foundation::orchestrator::Orchestrator;
use capstan_foundation::planner::{NaturalPlanner, PlannerConfig, WorkflowPlanner};
use capstan_foundation::registry::{MemoryRegistry, RegistryClient, RegistryEvent};
use capstan_foundation::resolver::{ParameterResolver, ResolverConfig};
use capstan_foundation::schema::SchemaCache;
use capstan_foundation::tasks::{
    Janitor, JanitorConfig, MemoryTaskQueue, MemoryTaskStore, OrchestrateHandler, WorkerPool,
    WorkerPoolConfig,
};
use capstan_gateway::server::{GatewayServer, GatewayServerConfig};
use capstan_gateway::state::AppState;
use capstan_kernel::clock::{Clock, SystemClock};
use capstan_kernel::config::RuntimeConfig;
use capstan_kernel::oracle::LlmOracle;
use capstan_kernel::store::{TaskQueue, TaskStore};
use capstan_kernel::telemetry::SharedEventSink;
use capstan_monitoring::{init_telemetry, LlmDebugCapture, TracingEventSink};
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RuntimeConfig::from_env().context("loading runtime configuration")?;
    let _telemetry = init_telemetry("capstan", config.otlp_endpoint.as_deref())
        .context("installing telemetry")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let events: SharedEventSink = Arc::new(TracingEventSink::new());

    // Registry + catalog.
    let backend = MemoryRegistry::new(Arc::clone(&clock));
    let registry = RegistryClient::new(backend.clone(), Arc::clone(&clock), config.registry_ttl);
    let catalog = ServiceCatalog::new(
        registry.clone(),
        Arc::clone(&clock),
        config.registry_ttl,
        config.catalog_relist_interval,
    );
    catalog.start().await.context("starting the catalog")?;

    // Schema cache, invalidated on catalog change events.
    let schemas = Arc::new(SchemaCache::new());
    {
        let schemas = Arc::clone(&schemas);
        let mut changes = registry.watch().await.context("subscribing for schema invalidation")?;
        tokio::spawn(async move {
            while let Some(event) = changes.next().await {
                if let RegistryEvent::Upserted(descriptor) = event {
                    schemas.invalidate_service(&descriptor.name);
                }
            }
        });
    }

    // Oracle + optional debug capture.
    let oracle: Arc<dyn LlmOracle> = Arc::new(
        OpenAiOracle::from_env()
            .context("CAPSTAN_LLM_BASE_URL must be set (the oracle endpoint)")?,
    );
    let capture = config.llm_debug_enabled.then(|| {
        Arc::new(LlmDebugCapture::new(
            Arc::clone(&clock),
            config.llm_debug_ttl,
            config.llm_debug_error_ttl,
        ))
    });

    // Execution pipeline.
    let client = Arc::new(CapabilityClient::new(config.call_timeout, Arc::clone(&events)));
    let resolver = Arc::new(ParameterResolver::new(
        Arc::clone(&schemas),
        Arc::clone(&events),
        ResolverConfig {
            semantic_retry_enabled: config.semantic_retry_enabled,
            semantic_retry_max_attempts: config.semantic_retry_max_attempts,
        },
    ));
    let executor = DagExecutor::new(
        Arc::clone(&catalog),
        client,
        resolver,
        Arc::clone(&events),
        ExecutorConfig {
            max_parallel_steps: config.max_parallel_steps,
            step_timeout: config.step_timeout,
            plan_timeout: config.plan_timeout,
            call_timeout: config.call_timeout,
            mechanical_max_attempts: config.mechanical_max_attempts,
            param_repair_max_attempts: 2,
        },
    );
    let planner = NaturalPlanner::new(
        Arc::clone(&catalog),
        Arc::clone(&events),
        PlannerConfig {
            max_attempts: config.planner_max_attempts,
            temperature: config.planner_temperature,
            max_tokens: config.planner_max_tokens,
            allow_empty_plans: config.allow_empty_plans,
        },
    );
    let workflows = Arc::new(WorkflowPlanner::new());
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&catalog),
        planner,
        workflows,
        executor,
        oracle,
        capture,
        config.clone(),
    ));

    // Task subsystem.
    let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
    let queue: Arc<dyn TaskQueue> = Arc::new(MemoryTaskQueue::new());

    let stop = CancellationToken::new();
    let mut worker_handle = None;
    let mut janitor_handle = None;
    if config.mode.runs_workers() {
        let mut pool = WorkerPool::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&clock),
            Arc::clone(&events),
            WorkerPoolConfig {
                worker_count: config.worker_count,
                dequeue_wait: config.dequeue_wait,
                heartbeat_interval: config.heartbeat_interval,
                handler_timeout: config.handler_timeout,
                shutdown_budget: config.shutdown_budget,
            },
        );
        pool.register_handler(Arc::new(OrchestrateHandler::new(Arc::clone(&orchestrator))));
        worker_handle = Some(pool.start());

        let janitor = Janitor::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&clock),
            Arc::clone(&events),
            JanitorConfig {
                interval: config.janitor_interval,
                grace: config.janitor_grace,
            },
        );
        janitor_handle = Some(janitor.start(stop.clone()));
    }

    if config.mode.serves_api() {
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);
        let state = AppState {
            orchestrator,
            store,
            queue,
            catalog: Arc::clone(&catalog),
        };
        let server = GatewayServer::new(GatewayServerConfig { port });
        let shutdown = {
            let stop = stop.clone();
            async move {
                let _ = tokio::signal::ctrl_c().await;
                stop.cancel();
            }
        };
        server.start(state, shutdown).await.context("serving HTTP")?;
    } else {
        info!("worker-only mode; waiting for shutdown signal");
        tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
        stop.cancel();
    }

    if let Some(handle) = worker_handle {
        handle.shutdown().await;
    }
    if let Some(handle) = janitor_handle {
        let _ = handle.await;
    }
    catalog.shutdown();
    backend.shutdown();
    info!("capstan stopped");
    Ok(())
}
