//! Versioning: immutable snapshots and the current-version pointer.
//!
//! Every run references a version, and version records never mutate.
//! History is preserved under all operations; "rollback" is creating a
//! new version from an older visual graph, never rewinding the pointer
//! over existing records.

use miette::Diagnostic;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::graphs::{compile, CompileFailure, ExecutionGraph, VisualGraph};
use crate::state::{Version, VersionMeta};
use crate::store::{Store, StoreError};
use crate::utils::json_ext::canonically_equal;
use crate::workers::WorkerRegistry;

/// Errors from version operations.
#[derive(Debug, Error, Diagnostic)]
pub enum VersionError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Compile(#[from] CompileFailure),

    #[error("flow not found: {flow_id}")]
    #[diagnostic(code(flowrun::versions::flow_not_found))]
    FlowNotFound { flow_id: String },

    #[error("version not found: {version_id}")]
    #[diagnostic(code(flowrun::versions::version_not_found))]
    VersionNotFound { version_id: String },

    #[error("flow {flow_id} has no current version and no graph was supplied")]
    #[diagnostic(
        code(flowrun::versions::no_current_version),
        help("Create a version first, or include a visualGraph in the run request.")
    )]
    NoCurrentVersion { flow_id: String },

    #[error(transparent)]
    #[diagnostic(code(flowrun::versions::store))]
    Store(#[from] StoreError),
}

/// Creates and resolves immutable flow versions.
#[derive(Clone)]
pub struct VersionManager {
    store: Arc<dyn Store>,
    registry: Arc<WorkerRegistry>,
}

impl VersionManager {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, registry: Arc<WorkerRegistry>) -> Self {
        Self { store, registry }
    }

    /// Compile `visual_graph` and persist it as a new version of the flow,
    /// atomically advancing the flow's current-version pointer.
    ///
    /// # Errors
    ///
    /// [`VersionError::Compile`] carries the full validation error list;
    /// nothing is persisted on failure.
    #[instrument(skip(self, visual_graph, commit_message), err)]
    pub async fn create_version(
        &self,
        flow_id: &str,
        visual_graph: VisualGraph,
        commit_message: Option<String>,
    ) -> Result<(String, ExecutionGraph), VersionError> {
        if self.store.get_flow(flow_id).await?.is_none() {
            return Err(VersionError::FlowNotFound {
                flow_id: flow_id.to_string(),
            });
        }
        let execution_graph = compile(&visual_graph, &self.registry)?;

        let version = Version {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            visual_graph,
            execution_graph: execution_graph.clone(),
            commit_message,
            created_at: chrono::Utc::now(),
        };
        let version_id = version.id.clone();
        self.store.insert_version(version).await?;
        self.store
            .update_flow_current_version(flow_id, &version_id)
            .await?;
        info!(flow_id, %version_id, "version created");
        Ok((version_id, execution_graph))
    }

    pub async fn get_version(&self, version_id: &str) -> Result<Option<Version>, VersionError> {
        Ok(self.store.get_version(version_id).await?)
    }

    /// Version metadata for a flow, newest first. Graphs are excluded to
    /// keep history listings light.
    pub async fn list_versions(&self, flow_id: &str) -> Result<Vec<VersionMeta>, VersionError> {
        Ok(self.store.list_version_metadata(flow_id).await?)
    }

    /// Resolve the version a new run should execute.
    ///
    /// - No current version: compile and create one (requires a graph).
    /// - Current version differs from the supplied graph (canonical,
    ///   key-order-independent comparison): create a new version.
    /// - Identical or no graph supplied: reuse the current version.
    #[instrument(skip(self, current_graph), err)]
    pub async fn auto_version_on_run(
        &self,
        flow_id: &str,
        current_graph: Option<&VisualGraph>,
    ) -> Result<String, VersionError> {
        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or_else(|| VersionError::FlowNotFound {
                flow_id: flow_id.to_string(),
            })?;

        match (flow.current_version_id, current_graph) {
            (None, Some(graph)) => {
                let (version_id, _) = self
                    .create_version(
                        flow_id,
                        graph.clone(),
                        Some("initial, auto-created on run".to_string()),
                    )
                    .await?;
                Ok(version_id)
            }
            (None, None) => Err(VersionError::NoCurrentVersion {
                flow_id: flow_id.to_string(),
            }),
            (Some(current_id), None) => Ok(current_id),
            (Some(current_id), Some(graph)) => {
                let current = self.store.get_version(&current_id).await?.ok_or_else(|| {
                    VersionError::VersionNotFound {
                        version_id: current_id.clone(),
                    }
                })?;
                if graphs_equal(&current.visual_graph, graph) {
                    Ok(current_id)
                } else {
                    let (version_id, _) = self
                        .create_version(
                            flow_id,
                            graph.clone(),
                            Some("auto-versioned on run".to_string()),
                        )
                        .await?;
                    Ok(version_id)
                }
            }
        }
    }
}

/// Key-order-independent deep comparison of two visual graphs, via their
/// canonical JSON forms.
fn graphs_equal(a: &VisualGraph, b: &VisualGraph) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => canonically_equal(&a, &b),
        _ => false,
    }
}
