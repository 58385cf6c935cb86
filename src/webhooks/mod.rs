//! Webhook ingestion pipeline.
//!
//! Inbound webhooks are the third way runs get created (next to the API
//! and interactive triggers). The pipeline is a fixed sequence of
//! independently testable steps: rate limiting, endpoint lookup,
//! signature verification (timing-safe, with freshness windows for
//! timestamped schemes), entity extraction and upsert, version
//! resolution, run creation, event logging.

mod ingress;
mod rate_limit;
mod signature;
mod sources;

pub use ingress::{WebhookAccepted, WebhookIngress};
pub use rate_limit::SlidingWindowLimiter;
pub use signature::{sign_hex, verify_signature};
pub use sources::{ExtractedEntity, WebhookSource};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors from webhook ingestion. Each variant maps to a fixed HTTP
/// status at the API boundary.
#[derive(Debug, Error, Diagnostic)]
pub enum WebhookError {
    #[error("unknown webhook endpoint: {slug}")]
    #[diagnostic(code(flowrun::webhooks::config_not_found))]
    ConfigNotFound { slug: String },

    #[error("webhook endpoint {slug} is inactive")]
    #[diagnostic(code(flowrun::webhooks::inactive))]
    Inactive { slug: String },

    #[error("signature verification failed")]
    #[diagnostic(code(flowrun::webhooks::signature))]
    Signature,

    #[error("missing required signature header {header}")]
    #[diagnostic(
        code(flowrun::webhooks::missing_signature),
        help("This endpoint requires signed deliveries; configure the sender's secret.")
    )]
    MissingSignature { header: &'static str },

    #[error("timestamp outside freshness window ({skew_secs}s skew, {window_secs}s allowed)")]
    #[diagnostic(code(flowrun::webhooks::timestamp))]
    Timestamp { skew_secs: i64, window_secs: u64 },

    #[error("rate limit exceeded; retry after {retry_after_secs}s")]
    #[diagnostic(code(flowrun::webhooks::rate_limited))]
    RateLimited { retry_after_secs: u64 },

    #[error("payload rejected: {message}")]
    #[diagnostic(code(flowrun::webhooks::payload))]
    Payload { message: String },

    #[error(transparent)]
    #[diagnostic(code(flowrun::webhooks::store))]
    Store(#[from] crate::store::StoreError),

    #[error("run creation failed: {0}")]
    #[diagnostic(code(flowrun::webhooks::run))]
    Run(#[from] Box<crate::engine::EngineError>),
}

/// Per-endpoint webhook configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// URL path segment identifying this endpoint.
    pub slug: String,
    pub flow_id: String,
    /// Shared secret for signature verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub source: WebhookSource,
    /// When set, unsigned deliveries are rejected even in development.
    #[serde(default)]
    pub require_signature: bool,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// One entry in the webhook event log. Written for successes and failures
/// alike, so every delivery leaves a trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    pub slug: String,
    pub received_at: DateTime<Utc>,
    /// `accepted`, `replay_rejected`, `signature_rejected`,
    /// `rate_limited`, `payload_rejected`, `config_rejected`.
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl WebhookEvent {
    #[must_use]
    pub fn new(slug: &str, outcome: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slug: slug.to_string(),
            received_at: Utc::now(),
            outcome: outcome.to_string(),
            entity_id: None,
            run_id: None,
        }
    }
}
