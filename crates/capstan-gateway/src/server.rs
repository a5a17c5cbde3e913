//! Axum-based HTTP gateway server.
//!
//! [`GatewayServer`] wires the orchestrator, task store/queue, and
//! catalog into a running axum service.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Liveness + catalog/queue summary. |
//! | `POST` | `/orchestrate/natural` | Plan and execute a natural-language request. |
//! | `POST` | `/orchestrate/workflow/{name}` | Instantiate and execute a named workflow. |
//! | `POST` | `/tasks` | Submit an asynchronous task (202). |
//! | `GET`  | `/tasks/{id}` | Full task state, progress, and result. |
//! | `POST` | `/tasks/{id}/cancel` | Cancel a non-terminal task (409 otherwise). |

use crate::handlers::{health, orchestrate, tasks};
use crate::state::AppState;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

// ─────────────────────────────────────────────────────────────────────────────
// GatewayServerConfig
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime configuration for [`GatewayServer`].
#[derive(Debug, Clone)]
pub struct GatewayServerConfig {
    /// TCP port to listen on (default: 8080).
    pub port: u16,
}

impl Default for GatewayServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// GatewayServer
// ─────────────────────────────────────────────────────────────────────────────

/// High-level gateway server over the orchestration runtime.
pub struct GatewayServer {
    config: GatewayServerConfig,
}

impl GatewayServer {
    /// Create a new server from the given configuration.
    pub fn new(config: GatewayServerConfig) -> Self {
        Self { config }
    }

    /// Build the axum [`Router`] over the shared state.
    pub fn build_app(state: AppState) -> Router {
        Router::new()
            .route("/health", get(health::health))
            .route("/orchestrate/natural", post(orchestrate::orchestrate_natural))
            .route(
                "/orchestrate/workflow/{name}",
                post(orchestrate::orchestrate_workflow),
            )
            .route("/tasks", post(tasks::submit_task))
            .route("/tasks/{id}", get(tasks::get_task))
            .route("/tasks/{id}/cancel", post(tasks::cancel_task))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Bind to `0.0.0.0:{port}` and serve until `shutdown` resolves.
    pub async fn start(
        self,
        state: AppState,
        shutdown: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let app = Self::build_app(state);
        let addr = format!("0.0.0.0:{}", self.config.port);
        info!(addr = %addr, "capstan gateway starting");
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
    }
}
