//! Fully wired in-process runtime for end-to-end scenarios.

use capstan_foundation::capability::CapabilityClient;
use capstan_foundation::catalog::ServiceCatalog;
use capstan_foundation::executor::{DagExecutor, ExecutorConfig};
use capstan_foundation::orchestrator::Orchestrator;
use capstan_foundation::planner::{NaturalPlanner, PlannerConfig, WorkflowPlanner};
use capstan_foundation::registry::{MemoryRegistry, RegistryClient};
use capstan_foundation::resolver::{ParameterResolver, ResolverConfig};
use capstan_foundation::schema::SchemaCache;
use capstan_foundation::tasks::{MemoryTaskQueue, MemoryTaskStore};
use capstan_kernel::clock::{Clock, SystemClock};
use capstan_kernel::config::RuntimeConfig;
use capstan_kernel::oracle::LlmOracle;
use capstan_kernel::service::ServiceDescriptor;
use capstan_kernel::telemetry::{RecordingSink, SharedEventSink};
use std::sync::Arc;
use std::time::Duration;

/// Everything an end-to-end scenario needs, wired like the binary.
pub struct TestRuntime {
    pub backend: Arc<MemoryRegistry>,
    pub registry: RegistryClient,
    pub catalog: Arc<ServiceCatalog>,
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<MemoryTaskStore>,
    pub queue: Arc<MemoryTaskQueue>,
    pub sink: Arc<RecordingSink>,
}

impl TestRuntime {
    /// Wire a runtime around the given oracle, with test-sized
    /// timeouts and backoffs.
    pub async fn with_oracle(oracle: Arc<dyn LlmOracle>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let sink = Arc::new(RecordingSink::new());
        let events: SharedEventSink = sink.clone();

        let backend = MemoryRegistry::new(Arc::clone(&clock));
        let registry =
            RegistryClient::new(backend.clone(), Arc::clone(&clock), Duration::from_secs(30));
        let catalog = ServiceCatalog::new(
            registry.clone(),
            Arc::clone(&clock),
            Duration::from_secs(30),
            Duration::from_secs(3600),
        );
        catalog.start().await.expect("catalog start");

        let schemas = Arc::new(SchemaCache::new());
        let client = Arc::new(CapabilityClient::new(
            Duration::from_secs(5),
            Arc::clone(&events),
        ));
        let resolver = Arc::new(ParameterResolver::new(
            Arc::clone(&schemas),
            Arc::clone(&events),
            ResolverConfig::default(),
        ));
        let executor = DagExecutor::new(
            Arc::clone(&catalog),
            client,
            resolver,
            Arc::clone(&events),
            ExecutorConfig {
                max_parallel_steps: 8,
                step_timeout: Duration::from_secs(10),
                plan_timeout: Duration::from_secs(30),
                call_timeout: Duration::from_secs(5),
                mechanical_max_attempts: 3,
                param_repair_max_attempts: 2,
            },
        );
        let planner = NaturalPlanner::new(
            Arc::clone(&catalog),
            Arc::clone(&events),
            PlannerConfig::default(),
        );
        let workflows = Arc::new(WorkflowPlanner::new());

        let mut config = RuntimeConfig::default();
        config.mechanical_backoff_base = Duration::from_millis(5);
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&catalog),
            planner,
            workflows,
            executor,
            oracle,
            None,
            config,
        ));

        Self {
            backend,
            registry,
            catalog,
            orchestrator,
            store: Arc::new(MemoryTaskStore::new()),
            queue: Arc::new(MemoryTaskQueue::new()),
            sink,
        }
    }

    /// Register a service and force the catalog to see it.
    pub async fn register(&self, descriptor: ServiceDescriptor) {
        self.registry
            .register(descriptor)
            .await
            .expect("registration");
        self.catalog.relist().await.expect("catalog relist");
    }

    /// Tear down background tasks.
    pub fn shutdown(&self) {
        self.catalog.shutdown();
        self.backend.shutdown();
    }
}
