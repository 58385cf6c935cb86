//! Edge-walking execution engine.
//!
//! The engine is stateless: every run-visible mutation goes through the
//! store's atomic primitives, so any number of engine instances (or HTTP
//! callback handlers) can service the same run safely. The submodules
//! split the work the way execution flows:
//!
//! - [`lifecycle`]: run creation, terminal-status recomputation, retry,
//!   cancellation, UX completion
//! - [`walker`]: `fire_node` / node completion / downstream propagation
//! - [`fanout`]: splitter enumeration and collector aggregation
//!
//! Suspension points (async workers, UX gates, collectors waiting for
//! arrivals) all return without blocking; callbacks resume the walk later
//! on whatever task receives them.

mod fanout;
mod lifecycle;
mod walker;

use miette::Diagnostic;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EngineConfig;
use crate::state::{Run, Version};
use crate::store::{Store, StoreError};
use crate::types::NodeStatus;
use crate::workers::{Dispatcher, WorkerRegistry};

/// Errors surfaced by engine operations.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("run not found: {run_id}")]
    #[diagnostic(code(flowrun::engine::run_not_found))]
    RunNotFound { run_id: String },

    #[error("version not found: {version_id}")]
    #[diagnostic(code(flowrun::engine::version_not_found))]
    VersionNotFound { version_id: String },

    #[error("node {node_id} not present in run {run_id}")]
    #[diagnostic(code(flowrun::engine::node_not_found))]
    NodeNotFound { run_id: String, node_id: String },

    #[error("version {version_id} does not belong to flow {flow_id}")]
    #[diagnostic(
        code(flowrun::engine::version_flow_mismatch),
        help("Runs must reference a version created for their own flow.")
    )]
    VersionFlowMismatch { version_id: String, flow_id: String },

    #[error("invalid status transition on node {node_id}: {from} -> {to}")]
    #[diagnostic(code(flowrun::engine::status_transition))]
    StatusTransition {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error(transparent)]
    #[diagnostic(code(flowrun::engine::store))]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::InvalidTransition { node_id, from, to } => {
                EngineError::StatusTransition { node_id, from, to }
            }
            other => EngineError::Store(other),
        }
    }
}

/// The engine. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) config: Arc<EngineConfig>,
    /// Base URL prepended to `/callback/{run}/{node}` for async workers.
    pub(crate) callback_base: String,
}

impl Engine {
    #[must_use]
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<WorkerRegistry>,
        config: Arc<EngineConfig>,
        callback_base: impl Into<String>,
    ) -> Self {
        Self {
            store,
            dispatcher: Dispatcher::new(registry, Arc::clone(&config)),
            config,
            callback_base: callback_base.into(),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Node-state CAS with bounded retries on transient backend errors.
    ///
    /// Exhausting the retries is fatal for the operation (and typically
    /// the node), never for the run.
    pub(crate) async fn cas_node(
        &self,
        run_id: &str,
        node_id: &str,
        expected_from: &[crate::types::NodeStatus],
        new_status: crate::types::NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<crate::store::CasOutcome, EngineError> {
        const MAX_ATTEMPTS: u32 = 4;
        let mut attempt = 0;
        loop {
            match self
                .store
                .update_node_state(
                    run_id,
                    node_id,
                    expected_from,
                    new_status,
                    output.clone(),
                    error.clone(),
                )
                .await
            {
                Err(StoreError::Backend { message }) if attempt + 1 < MAX_ATTEMPTS => {
                    attempt += 1;
                    let jitter = {
                        use rand::Rng;
                        rand::rng().random_range(5..40u64)
                    };
                    tracing::warn!(
                        run_id,
                        node_id,
                        attempt,
                        %message,
                        "transient store error; retrying CAS"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(
                        u64::from(attempt) * 20 + jitter,
                    ))
                    .await;
                }
                other => return Ok(other?),
            }
        }
    }

    pub(crate) async fn load_run(&self, run_id: &str) -> Result<Run, EngineError> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound {
                run_id: run_id.to_string(),
            })
    }

    pub(crate) async fn load_version(&self, version_id: &str) -> Result<Version, EngineError> {
        self.store
            .get_version(version_id)
            .await?
            .ok_or_else(|| EngineError::VersionNotFound {
                version_id: version_id.to_string(),
            })
    }

    pub(crate) fn callback_url(&self, run_id: &str, node_id: &str) -> String {
        format!("{}/callback/{run_id}/{node_id}", self.callback_base)
    }
}

/// Resolve an edge mapping against an upstream output.
///
/// With no mapping the whole output passes through. With a mapping, only
/// the mapped keys propagate: each value is a dotted path into the output,
/// or a literal when the path does not resolve.
pub(crate) fn resolve_mapping(
    mapping: &std::collections::BTreeMap<String, String>,
    output: &Value,
) -> Value {
    use crate::utils::json_ext::resolve_path;

    if mapping.is_empty() {
        return output.clone();
    }
    let mut patch = serde_json::Map::new();
    for (input_name, source_path) in mapping {
        let value = resolve_path(output, source_path)
            .unwrap_or_else(|| Value::String(source_path.clone()));
        patch.insert(input_name.clone(), value);
    }
    Value::Object(patch)
}
