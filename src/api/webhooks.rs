//! Webhook ingestion handlers.

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use crate::api::error::ApiResult;
use crate::api::AppState;

/// `POST /webhooks/{slug}`: primary ingestion route.
///
/// Returns 200 on acceptance (including deduplicated replays, which are
/// acknowledged without creating a run); failures map to 400/401/404/429
/// per the error type.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let source_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .unwrap_or("local")
        .trim()
        .to_string();

    let mut header_map: FxHashMap<String, String> = FxHashMap::default();
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_ascii_lowercase(), value.to_string());
        }
    }

    let accepted = state
        .ingress
        .receive(&slug, &source_ip, &header_map, &body)
        .await?;

    Ok(Json(json!({
        "status": "accepted",
        "runId": accepted.run_id,
        "entityId": accepted.entity_id,
        "deduplicated": accepted.deduplicated,
    })))
}
