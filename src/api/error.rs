//! API error mapping.
//!
//! Every domain error maps to a fixed HTTP status; validation failures
//! carry their structured error list in the body so editors can render
//! them per node/edge.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::engine::EngineError;
use crate::versions::VersionError;
use crate::webhooks::WebhookError;

/// Unified handler error.
#[derive(Debug)]
pub enum ApiError {
    Engine(EngineError),
    Version(VersionError),
    Webhook(WebhookError),
    BadRequest(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        ApiError::Engine(err)
    }
}

impl From<VersionError> for ApiError {
    fn from(err: VersionError) -> Self {
        ApiError::Version(err)
    }
}

impl From<WebhookError> for ApiError {
    fn from(err: WebhookError) -> Self {
        ApiError::Webhook(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Engine(err) => {
                let status = match &err {
                    EngineError::RunNotFound { .. }
                    | EngineError::VersionNotFound { .. }
                    | EngineError::NodeNotFound { .. } => StatusCode::NOT_FOUND,
                    EngineError::StatusTransition { .. } => StatusCode::CONFLICT,
                    EngineError::VersionFlowMismatch { .. } => StatusCode::BAD_REQUEST,
                    EngineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, Json(json!({"error": err.to_string()}))).into_response()
            }
            ApiError::Version(err) => match err {
                VersionError::Compile(failure) => (
                    StatusCode::UNPROCESSABLE_ENTITY,
                    Json(json!({
                        "error": failure.to_string(),
                        "validationErrors": failure.errors,
                    })),
                )
                    .into_response(),
                VersionError::FlowNotFound { .. } | VersionError::VersionNotFound { .. } => (
                    StatusCode::NOT_FOUND,
                    Json(json!({"error": err.to_string()})),
                )
                    .into_response(),
                VersionError::NoCurrentVersion { .. } => (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": err.to_string()})),
                )
                    .into_response(),
                VersionError::Store(_) => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": err.to_string()})),
                )
                    .into_response(),
            },
            ApiError::Webhook(err) => {
                let status = match &err {
                    WebhookError::ConfigNotFound { .. } | WebhookError::Inactive { .. } => {
                        StatusCode::NOT_FOUND
                    }
                    WebhookError::MissingSignature { .. } => StatusCode::UNAUTHORIZED,
                    WebhookError::Signature
                    | WebhookError::Timestamp { .. }
                    | WebhookError::Payload { .. } => StatusCode::BAD_REQUEST,
                    WebhookError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
                    WebhookError::Store(_) | WebhookError::Run(_) => {
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                if let WebhookError::RateLimited { retry_after_secs } = &err {
                    return (
                        status,
                        [(header::RETRY_AFTER, retry_after_secs.to_string())],
                        Json(json!({"error": err.to_string()})),
                    )
                        .into_response();
                }
                (status, Json(json!({"error": err.to_string()}))).into_response()
            }
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": message})),
            )
                .into_response(),
        }
    }
}
