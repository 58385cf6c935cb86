//! Signature verification with timing-safe comparison.
//!
//! All schemes are HMAC-SHA256 over a source-specific payload shape.
//! Verification order matters: for timestamped schemes the freshness
//! window is enforced before any MAC work, so a stale payload is rejected
//! regardless of signature validity. The comparison itself goes through
//! `Mac::verify_slice`, whose running time depends only on the secret's
//! digest length, behind an explicit length guard.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use super::sources::WebhookSource;
use super::WebhookError;

type HmacSha256 = Hmac<Sha256>;

const SHA256_LEN: usize = 32;

/// Verify a webhook signature.
///
/// `header_value` is the raw value of the source's signature header;
/// `now_unix` is the engine's current time (injected for testability).
///
/// # Errors
///
/// - [`WebhookError::Timestamp`] when a timestamped scheme's claimed time
///   is outside `freshness` (checked before the signature)
/// - [`WebhookError::Signature`] for malformed headers, wrong-length
///   digests, and MAC mismatches
pub fn verify_signature(
    source: WebhookSource,
    secret: &str,
    body: &[u8],
    header_value: &str,
    now_unix: i64,
    freshness: Duration,
) -> Result<(), WebhookError> {
    match source {
        WebhookSource::Stripe | WebhookSource::Calendly => {
            let (timestamp, candidates) = parse_timestamped_header(header_value)?;
            let skew = (now_unix - timestamp).abs();
            if skew > freshness.as_secs() as i64 {
                return Err(WebhookError::Timestamp {
                    skew_secs: skew,
                    window_secs: freshness.as_secs(),
                });
            }
            let mut signed = timestamp.to_string().into_bytes();
            signed.push(b'.');
            signed.extend_from_slice(body);
            if candidates
                .iter()
                .any(|candidate| mac_matches(secret, &signed, candidate))
            {
                Ok(())
            } else {
                Err(WebhookError::Signature)
            }
        }
        WebhookSource::Github => {
            let hex_digest = header_value
                .strip_prefix("sha256=")
                .ok_or(WebhookError::Signature)?;
            if mac_matches(secret, body, hex_digest) {
                Ok(())
            } else {
                Err(WebhookError::Signature)
            }
        }
        WebhookSource::Generic => {
            if mac_matches(secret, body, header_value.trim()) {
                Ok(())
            } else {
                Err(WebhookError::Signature)
            }
        }
    }
}

/// Parse `t=<unix>,v1=<hex>[,v1=<hex>...]` headers (Stripe/Calendly shape).
fn parse_timestamped_header(header: &str) -> Result<(i64, Vec<&str>), WebhookError> {
    let mut timestamp: Option<i64> = None;
    let mut candidates: Vec<&str> = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = t.parse().ok();
        } else if let Some(sig) = part.strip_prefix("v1=") {
            candidates.push(sig);
        }
    }
    match (timestamp, candidates.is_empty()) {
        (Some(t), false) => Ok((t, candidates)),
        _ => Err(WebhookError::Signature),
    }
}

/// Constant-time comparison of an incoming hex digest against the expected
/// MAC. The length guard rejects truncated digests up front; everything
/// after it runs in time independent of how many bytes match.
fn mac_matches(secret: &str, signed_payload: &[u8], incoming_hex: &str) -> bool {
    let Ok(incoming) = hex::decode(incoming_hex) else {
        return false;
    };
    if incoming.len() != SHA256_LEN {
        return false;
    }
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(signed_payload);
    mac.verify_slice(&incoming).is_ok()
}

/// Compute the hex HMAC for a signed payload. Used by tests and by
/// outbound integrations that need to sign their own deliveries.
#[must_use]
pub fn sign_hex(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length; new_from_slice cannot fail here.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
