//! The webhook ingestion pipeline.
//!
//! `receive` composes the fixed step sequence; every rejection is written
//! to the event log before the error propagates, so a delivery always
//! leaves a trace whether it succeeds or not.

use chrono::Utc;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::entities::Entity;
use crate::store::Store;
use crate::webhooks::{
    verify_signature, SlidingWindowLimiter, WebhookConfig, WebhookError, WebhookEvent,
};

/// Result of an accepted delivery.
#[derive(Clone, Debug, PartialEq)]
pub struct WebhookAccepted {
    pub entity_id: Option<String>,
    pub run_id: Option<String>,
    /// `true` when a replayed event id short-circuited run creation.
    pub deduplicated: bool,
}

/// Webhook ingestion front door.
#[derive(Clone)]
pub struct WebhookIngress {
    store: Arc<dyn Store>,
    engine: Engine,
    limiter: Arc<SlidingWindowLimiter>,
    config: Arc<EngineConfig>,
}

impl WebhookIngress {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, engine: Engine, config: Arc<EngineConfig>) -> Self {
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limit_window,
            config.rate_limit_burst,
        ));
        Self {
            store,
            engine,
            limiter,
            config,
        }
    }

    /// Shared limiter handle, so branded integration routes can reuse the
    /// same admission budget.
    #[must_use]
    pub fn limiter(&self) -> Arc<SlidingWindowLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Process one inbound delivery.
    ///
    /// `headers` carries lowercased header names. The pipeline: rate
    /// limit, endpoint lookup, signature verification (freshness first
    /// for timestamped schemes), payload parse, replay short-circuit,
    /// entity upsert, version resolution, run creation, event log.
    #[instrument(skip(self, headers, body), err)]
    pub async fn receive(
        &self,
        slug: &str,
        source_ip: &str,
        headers: &FxHashMap<String, String>,
        body: &[u8],
    ) -> Result<WebhookAccepted, WebhookError> {
        // 1. Admission control, shared across all webhook-class routes.
        if let Err(retry_after) = self.limiter.check(slug, source_ip) {
            self.log_event(WebhookEvent::new(slug, "rate_limited")).await;
            return Err(WebhookError::RateLimited {
                retry_after_secs: retry_after.as_secs().max(1),
            });
        }

        // 2. Endpoint config must exist and be active.
        let Some(config) = self.store.get_webhook_config(slug).await? else {
            self.log_event(WebhookEvent::new(slug, "config_rejected")).await;
            return Err(WebhookError::ConfigNotFound {
                slug: slug.to_string(),
            });
        };
        if !config.active {
            self.log_event(WebhookEvent::new(slug, "config_rejected")).await;
            return Err(WebhookError::Inactive {
                slug: slug.to_string(),
            });
        }

        // 3. Signature verification.
        if let Err(err) = self.verify(&config, headers, body) {
            let outcome = match &err {
                WebhookError::Timestamp { .. } => "replay_rejected",
                _ => "signature_rejected",
            };
            self.log_event(WebhookEvent::new(slug, outcome)).await;
            return Err(err);
        }

        // 4. Payload parse.
        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(err) => {
                self.log_event(WebhookEvent::new(slug, "payload_rejected")).await;
                return Err(WebhookError::Payload {
                    message: err.to_string(),
                });
            }
        };

        // 5. Replay short-circuit on the source's event id.
        if let Some(event_id) = config.source.event_id(&payload) {
            if self.store.webhook_event_processed(slug, &event_id).await? {
                warn!(slug, %event_id, "replayed event short-circuited");
                self.log_event(WebhookEvent::new(slug, "replay_rejected")).await;
                return Ok(WebhookAccepted {
                    entity_id: None,
                    run_id: None,
                    deduplicated: true,
                });
            }
        }

        // 6. Entity extraction and flow-scoped upsert (matched by email).
        let extracted = config.source.extract_entity(&payload);
        let entity = self.upsert_entity(&config, &extracted).await?;

        // 7. Resolve the flow's current version; never the latest visual
        // graph directly.
        let flow = self.store.get_flow(&config.flow_id).await?.ok_or_else(|| {
            WebhookError::Payload {
                message: format!("webhook flow {} does not exist", config.flow_id),
            }
        })?;
        let Some(version_id) = flow.current_version_id else {
            self.log_event(WebhookEvent::new(slug, "config_rejected")).await;
            return Err(WebhookError::Payload {
                message: format!("flow {} has no current version", config.flow_id),
            });
        };

        // 8. Create the run seeded with the entity data.
        let mut seed = match &extracted.attributes {
            Value::Object(map) => map.clone(),
            other if !other.is_null() => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
            _ => serde_json::Map::new(),
        };
        if let Some(email) = &entity.email {
            seed.entry("email".to_string())
                .or_insert_with(|| Value::String(email.clone()));
        }
        let run = self
            .engine
            .start_run(
                &config.flow_id,
                &version_id,
                Some(Value::Object(seed)),
                Some(entity.id.clone()),
            )
            .await
            .map_err(|e| WebhookError::Run(Box::new(e)))?;

        let mut event = WebhookEvent::new(slug, "accepted");
        event.entity_id = Some(entity.id.clone());
        event.run_id = Some(run.id.clone());
        self.log_event(event).await;
        info!(slug, run_id = %run.id, entity_id = %entity.id, "webhook accepted");

        Ok(WebhookAccepted {
            entity_id: Some(entity.id),
            run_id: Some(run.id),
            deduplicated: false,
        })
    }

    fn verify(
        &self,
        config: &WebhookConfig,
        headers: &FxHashMap<String, String>,
        body: &[u8],
    ) -> Result<(), WebhookError> {
        let required = config.require_signature || self.config.require_webhook_signature;
        let configured = config.secret.is_some();
        if !required && !configured {
            return Ok(());
        }
        let Some(secret) = config.secret.as_deref() else {
            // Required but no secret on file: treat as a signature failure
            // rather than silently admitting unsigned traffic.
            return Err(WebhookError::Signature);
        };
        let header_name = config.source.signature_header();
        let Some(header_value) = headers.get(header_name) else {
            return Err(WebhookError::MissingSignature {
                header: header_name,
            });
        };
        verify_signature(
            config.source,
            secret,
            body,
            header_value,
            Utc::now().timestamp(),
            self.config.webhook_freshness,
        )
    }

    async fn upsert_entity(
        &self,
        config: &WebhookConfig,
        extracted: &crate::webhooks::ExtractedEntity,
    ) -> Result<Entity, WebhookError> {
        let existing = match extracted.email.as_deref() {
            Some(email) => {
                self.store
                    .find_entity_by_email(&config.flow_id, email)
                    .await?
            }
            None => None,
        };
        let entity = match existing {
            Some(mut entity) => {
                entity.absorb_attributes(&extracted.attributes);
                entity
            }
            None => Entity::new(
                &config.flow_id,
                extracted.email.clone(),
                extracted.attributes.clone(),
            ),
        };
        self.store.upsert_entity(entity.clone()).await?;
        Ok(entity)
    }

    /// Event logging must never mask the pipeline's own outcome.
    async fn log_event(&self, event: WebhookEvent) {
        if let Err(err) = self.store.append_webhook_event(event).await {
            warn!(%err, "failed to append webhook event");
        }
    }
}
