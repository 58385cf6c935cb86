//! Webhook source adapters.
//!
//! Each supported sender has a small adapter describing its signature
//! header and payload shape, plus an extractor that lifts the payload
//! into a canonical entity record. Payload field access uses validated
//! path walks; missing fields degrade to `None`, never to a panic.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::utils::json_ext::resolve_path;

/// Supported webhook senders.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebhookSource {
    /// Stripe-style: `Stripe-Signature: t=<ts>,v1=<hmac>` over `"{t}.{body}"`.
    Stripe,
    /// Calendly-style: same timestamped scheme, different header.
    Calendly,
    /// GitHub-style: `X-Hub-Signature-256: sha256=<hmac>` over the raw body.
    Github,
    /// Generic: `X-Webhook-Signature: <hmac>` over the raw body.
    Generic,
}

impl WebhookSource {
    /// Header carrying this source's signature.
    #[must_use]
    pub fn signature_header(&self) -> &'static str {
        match self {
            WebhookSource::Stripe => "stripe-signature",
            WebhookSource::Calendly => "calendly-webhook-signature",
            WebhookSource::Github => "x-hub-signature-256",
            WebhookSource::Generic => "x-webhook-signature",
        }
    }

    /// Whether the signature scheme embeds a timestamp (and therefore a
    /// freshness window applies).
    #[must_use]
    pub fn timestamped(&self) -> bool {
        matches!(self, WebhookSource::Stripe | WebhookSource::Calendly)
    }

    /// Extract a canonical entity record from a payload.
    #[must_use]
    pub fn extract_entity(&self, payload: &Value) -> ExtractedEntity {
        match self {
            WebhookSource::Stripe => {
                let object = resolve_path(payload, "data.object").unwrap_or(Value::Null);
                let email = first_string(&object, &["email", "customer_email"])
                    .or_else(|| first_string(payload, &["data.object.billing_details.email"]));
                ExtractedEntity {
                    email,
                    attributes: object,
                }
            }
            WebhookSource::Calendly => {
                let inner = resolve_path(payload, "payload").unwrap_or(Value::Null);
                let email = first_string(&inner, &["email", "invitee.email"]);
                ExtractedEntity {
                    email,
                    attributes: inner,
                }
            }
            WebhookSource::Github | WebhookSource::Generic => ExtractedEntity {
                email: first_string(payload, &["email", "sender.email"]),
                attributes: payload.clone(),
            },
        }
    }

    /// Stable event identifier used to short-circuit replays, when the
    /// payload carries one.
    #[must_use]
    pub fn event_id(&self, payload: &Value) -> Option<String> {
        let paths: &[&str] = match self {
            WebhookSource::Stripe => &["id"],
            WebhookSource::Calendly => &["payload.uri", "id"],
            WebhookSource::Github => &["delivery", "id"],
            WebhookSource::Generic => &["id", "event_id"],
        };
        first_string(payload, paths)
    }
}

/// Canonical entity data lifted out of a webhook payload.
#[derive(Clone, Debug, PartialEq)]
pub struct ExtractedEntity {
    pub email: Option<String>,
    pub attributes: Value,
}

fn first_string(value: &Value, paths: &[&str]) -> Option<String> {
    paths
        .iter()
        .find_map(|p| resolve_path(value, p)?.as_str().map(str::to_string))
}
