//! Engine configuration.
//!
//! Configuration is read from the environment once at startup (a `.env`
//! file is honored via `dotenvy`, matching local development flows) and
//! then treated as immutable. Every recognized option has an explicit
//! default; unknown environment variables are ignored.

use rustc_hash::FxHashMap;
use std::time::Duration;

/// Engine operating mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineMode {
    Production,
    #[default]
    Development,
}

/// Immutable engine configuration.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub mode: EngineMode,
    /// Default maximum wall-clock between async dispatch and callback.
    pub worker_timeout: Duration,
    /// Per-worker-kind timeout overrides.
    pub worker_timeouts: FxHashMap<String, Duration>,
    /// Maximum accepted skew between a webhook's claimed timestamp and now.
    pub webhook_freshness: Duration,
    /// Sliding-window length for webhook rate limiting.
    pub rate_limit_window: Duration,
    /// Requests admitted per (slug, ip) within one window.
    pub rate_limit_burst: usize,
    /// Whether workers without credentials fall back to mock output.
    pub allow_mock_workers: bool,
    /// Whether webhook endpoints must verify signatures in this mode.
    pub require_webhook_signature: bool,
    /// Versions retained per flow; 0 means unbounded.
    pub max_versions_per_flow: usize,
    /// Connection URL for the SQLite store (e.g. `sqlite://flowrun.db`).
    pub sqlite_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::Development,
            worker_timeout: Duration::from_secs(30),
            worker_timeouts: FxHashMap::default(),
            webhook_freshness: Duration::from_secs(300),
            rate_limit_window: Duration::from_secs(60),
            rate_limit_burst: 60,
            allow_mock_workers: true,
            require_webhook_signature: false,
            max_versions_per_flow: 0,
            sqlite_url: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from the environment, applying defaults.
    ///
    /// Mode-sensitive defaults: in production, mock workers are disabled
    /// and webhook signatures are required unless explicitly overridden.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mode = match env_str("FLOWRUN_MODE").as_deref() {
            Some("production") => EngineMode::Production,
            _ => EngineMode::Development,
        };
        let production = mode == EngineMode::Production;

        Self {
            mode,
            worker_timeout: Duration::from_secs(env_u64("FLOWRUN_WORKER_TIMEOUT_SECS", 30)),
            worker_timeouts: FxHashMap::default(),
            webhook_freshness: Duration::from_secs(env_u64("FLOWRUN_WEBHOOK_FRESHNESS_SECS", 300)),
            rate_limit_window: Duration::from_secs(env_u64("FLOWRUN_RATE_LIMIT_WINDOW_SECS", 60)),
            rate_limit_burst: env_u64("FLOWRUN_RATE_LIMIT_BURST", 60) as usize,
            allow_mock_workers: env_bool("FLOWRUN_ALLOW_MOCK_WORKERS", !production),
            require_webhook_signature: env_bool("FLOWRUN_REQUIRE_WEBHOOK_SIGNATURE", production),
            max_versions_per_flow: env_u64("FLOWRUN_MAX_VERSIONS_PER_FLOW", 0) as usize,
            sqlite_url: env_str("FLOWRUN_SQLITE_URL"),
        }
    }

    /// Timeout for a given worker kind, falling back to the default.
    #[must_use]
    pub fn timeout_for(&self, worker_kind: &str) -> Duration {
        self.worker_timeouts
            .get(worker_kind)
            .copied()
            .unwrap_or(self.worker_timeout)
    }

    /// Set a per-kind timeout override (builder style, used in tests and
    /// embedding code).
    #[must_use]
    pub fn with_worker_timeout(mut self, kind: impl Into<String>, timeout: Duration) -> Self {
        self.worker_timeouts.insert(kind.into(), timeout);
        self
    }
}

fn env_str(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_u64(key: &str, default: u64) -> u64 {
    env_str(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    match env_str(key).as_deref() {
        Some("1") | Some("true") | Some("yes") => true,
        Some("0") | Some("false") | Some("no") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.worker_timeout, Duration::from_secs(30));
        assert_eq!(cfg.webhook_freshness, Duration::from_secs(300));
        assert_eq!(cfg.max_versions_per_flow, 0);
        assert!(cfg.allow_mock_workers);
        assert!(!cfg.require_webhook_signature);
    }

    #[test]
    fn per_kind_timeout_overrides_default() {
        let cfg = EngineConfig::default()
            .with_worker_timeout("video", Duration::from_secs(120));
        assert_eq!(cfg.timeout_for("video"), Duration::from_secs(120));
        assert_eq!(cfg.timeout_for("echo"), Duration::from_secs(30));
    }
}
