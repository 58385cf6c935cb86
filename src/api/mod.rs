//! HTTP surface: run lifecycle routes and webhook ingestion.
//!
//! The router is plain axum with shared [`AppState`]; embedding code can
//! mount it under any prefix or serve it standalone via [`serve`].

mod error;
mod runs;
mod webhooks;

pub use error::{ApiError, ApiResult};
pub use runs::{RunCreated, RunRequest, RunStatusView};

use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::store::Store;
use crate::versions::VersionManager;
use crate::webhooks::WebhookIngress;
use crate::workers::WorkerRegistry;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Engine,
    pub versions: VersionManager,
    pub ingress: WebhookIngress,
}

impl AppState {
    /// Wire up the full stack over a store and worker registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<WorkerRegistry>,
        config: Arc<EngineConfig>,
        callback_base: impl Into<String>,
    ) -> Self {
        let engine = Engine::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&config),
            callback_base,
        );
        let versions = VersionManager::new(Arc::clone(&store), registry);
        let ingress = WebhookIngress::new(store, engine.clone(), config);
        Self {
            engine,
            versions,
            ingress,
        }
    }
}

/// Build the API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/run/{flow_id}", post(runs::create_run))
        .route("/status/{run_id}", get(runs::run_status))
        .route("/callback/{run_id}/{node_id}", post(runs::worker_callback))
        .route("/complete/{run_id}/{node_id}", post(runs::complete_ux))
        .route("/retry/{run_id}/{node_id}", post(runs::retry_node))
        .route("/webhooks/{slug}", post(webhooks::receive_webhook))
        .with_state(state)
}

/// Serve the API until ctrl-c.
pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "flowrun API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
