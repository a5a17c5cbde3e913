//! Shared application state

use capstan_foundation::catalog::ServiceCatalog;
use capstan_foundation::orchestrator::Orchestrator;
use capstan_kernel::store::{TaskQueue, TaskStore};
use std::sync::Arc;

/// State injected into every axum handler via the `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub catalog: Arc<ServiceCatalog>,
}
