//! Run API handlers.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::error::{ApiError, ApiResult};
use crate::api::AppState;
use crate::graphs::VisualGraph;
use crate::types::RunStatus;

/// `POST /run/{flow_id}` request body.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    /// When supplied, the flow is auto-versioned before the run starts.
    #[serde(default)]
    pub visual_graph: Option<VisualGraph>,
    #[serde(default)]
    pub initial_inputs: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCreated {
    pub run_id: String,
    pub version_id: String,
    pub status_url: String,
}

/// Create a run, auto-versioning when a graph is supplied.
pub async fn create_run(
    State(state): State<AppState>,
    Path(flow_id): Path<String>,
    Json(request): Json<RunRequest>,
) -> ApiResult<Json<RunCreated>> {
    validate_id(&flow_id)?;
    let version_id = state
        .versions
        .auto_version_on_run(&flow_id, request.visual_graph.as_ref())
        .await?;
    let run = state
        .engine
        .start_run(&flow_id, &version_id, request.initial_inputs, None)
        .await?;
    Ok(Json(RunCreated {
        status_url: format!("/status/{}", run.id),
        run_id: run.id,
        version_id,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunStatusView {
    pub run_id: String,
    pub status: RunStatus,
    pub nodes: Map<String, Value>,
    pub final_outputs: Map<String, Value>,
}

/// `GET /status/{run_id}`: per-node statuses plus terminal outputs.
pub async fn run_status(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> ApiResult<Json<RunStatusView>> {
    let run = state
        .engine
        .store()
        .get_run(&run_id)
        .await
        .map_err(crate::engine::EngineError::from)?
        .ok_or(crate::engine::EngineError::RunNotFound {
            run_id: run_id.clone(),
        })?;
    let version = state
        .engine
        .store()
        .get_version(&run.version_id)
        .await
        .map_err(crate::engine::EngineError::from)?
        .ok_or(crate::engine::EngineError::VersionNotFound {
            version_id: run.version_id.clone(),
        })?;

    let mut nodes = Map::new();
    for (node_id, node_state) in &run.node_states {
        let mut view = Map::new();
        view.insert(
            "status".to_string(),
            Value::String(node_state.status.as_str().to_string()),
        );
        if let Some(output) = &node_state.output {
            view.insert("output".to_string(), output.clone());
        }
        if let Some(error) = &node_state.error {
            view.insert("error".to_string(), Value::String(error.clone()));
        }
        nodes.insert(node_id.clone(), Value::Object(view));
    }

    let mut final_outputs = Map::new();
    for terminal in &version.execution_graph.terminal_nodes {
        if let Some(output) = run.node_state(terminal).and_then(|s| s.output.clone()) {
            final_outputs.insert(terminal.clone(), output);
        }
    }

    Ok(Json(RunStatusView {
        run_id: run.id,
        status: run.status,
        nodes,
        final_outputs,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackStatus {
    Completed,
    Failed,
}

/// `POST /callback/{run}/{node}` request body. Extra keys beyond the
/// declared shape are ignored.
#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub status: CallbackStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Async worker callback: resume the walk.
pub async fn worker_callback(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(String, String)>,
    Json(request): Json<CallbackRequest>,
) -> ApiResult<Json<Value>> {
    validate_id(&run_id)?;
    validate_id(&node_id)?;
    state
        .engine
        .handle_callback(
            &run_id,
            &node_id,
            matches!(request.status, CallbackStatus::Completed),
            request.output,
            request.error,
        )
        .await?;
    Ok(Json(serde_json::json!({"status": "accepted"})))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub output: Value,
}

/// `POST /complete/{run}/{node}`: UX completion.
pub async fn complete_ux(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(String, String)>,
    Json(request): Json<CompleteRequest>,
) -> ApiResult<Json<Value>> {
    state
        .engine
        .complete_ux(&run_id, &node_id, request.output)
        .await?;
    Ok(Json(serde_json::json!({"status": "completed"})))
}

/// `POST /retry/{run}/{node}`: retry a failed node.
pub async fn retry_node(
    State(state): State<AppState>,
    Path((run_id, node_id)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    state.engine.retry_node(&run_id, &node_id).await?;
    Ok(Json(serde_json::json!({"status": "retrying"})))
}

/// Guard against path parameters that are obviously not identifiers.
pub(crate) fn validate_id(id: &str) -> ApiResult<()> {
    if id.is_empty() || id.len() > 256 {
        return Err(ApiError::BadRequest(format!("invalid identifier {id:?}")));
    }
    Ok(())
}
