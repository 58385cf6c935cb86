//! Worker abstraction, registry, and dispatch.
//!
//! Workers are polymorphic over input/output shape and dispatch mode,
//! modeled as a trait object registered under a worker-kind string. The
//! registry is process-wide state initialized at engine start and never
//! mutated concurrently with reads; compiler pass 3 rejects graphs that
//! name unregistered kinds.

mod builtin;
mod dispatch;

pub use builtin::{EchoWorker, HttpWorker, TransformWorker};
pub use dispatch::{DispatchOutcome, Dispatcher};

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;

/// How a worker returns its output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchMode {
    /// `invoke` returns the output in-process.
    Sync,
    /// `invoke` hands the work to an external service along with a
    /// callback URL; output arrives later through the callback endpoint.
    Async,
}

/// Errors produced while invoking a worker.
#[derive(Debug, Error, Diagnostic)]
pub enum WorkerError {
    #[error("worker invocation failed: {message}")]
    #[diagnostic(code(flowrun::worker::invoke))]
    Invoke { message: String },

    #[error("worker {kind:?} is missing credential {var}")]
    #[diagnostic(
        code(flowrun::worker::missing_credential),
        help("Set the {var} environment variable, or enable mock fallback in development.")
    )]
    MissingCredential { kind: String, var: String },

    #[error("worker transport error: {source}")]
    #[diagnostic(code(flowrun::worker::transport))]
    Transport {
        #[from]
        source: reqwest::Error,
    },
}

/// Execution context handed to a worker invocation.
#[derive(Clone, Debug)]
pub struct WorkerContext {
    pub run_id: String,
    pub node_id: String,
    /// Present for async workers; the external service reports back here.
    pub callback_url: Option<String>,
    /// The node's configuration record from the execution graph.
    pub config: Value,
}

/// A unit of compute dispatched by the engine.
///
/// Implementations should be stateless; any per-invocation state belongs in
/// the input or the node configuration.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Registered kind string; graphs reference workers by this name.
    fn kind(&self) -> &str;

    fn mode(&self) -> DispatchMode {
        DispatchMode::Sync
    }

    /// Declared output shape, used for mock synthesis and documentation.
    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    /// Environment variable holding this worker's credential, if it needs
    /// one. Missing credentials trigger mock fallback only when the engine
    /// configuration allows it.
    fn required_credential(&self) -> Option<&str> {
        None
    }

    /// Perform the work. Sync workers return their output; async workers
    /// hand off to an external service and return `Value::Null` (the real
    /// output arrives via the callback endpoint).
    async fn invoke(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError>;
}

/// Process-wide worker registry, keyed by kind string.
///
/// Built once at startup; lookups after that are read-only. An unknown
/// kind at lookup time is an error, never a silent default.
#[derive(Clone, Default)]
pub struct WorkerRegistry {
    workers: FxHashMap<String, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the builtin workers.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(EchoWorker);
        registry.register(TransformWorker);
        registry.register(HttpWorker::new());
        registry
    }

    /// Register a worker under its kind. Later registrations of the same
    /// kind replace earlier ones.
    pub fn register(&mut self, worker: impl Worker + 'static) {
        self.workers
            .insert(worker.kind().to_string(), Arc::new(worker));
    }

    #[must_use]
    pub fn get(&self, kind: &str) -> Option<Arc<dyn Worker>> {
        self.workers.get(kind).cloned()
    }

    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.workers.contains_key(kind)
    }

    /// Registered kinds in sorted order (for diagnostics).
    #[must_use]
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.workers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

impl std::fmt::Debug for WorkerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// Synthesize schema-conforming output for mock mode.
///
/// Walks a JSON-schema-shaped `properties` object and produces placeholder
/// values by declared type. Anything unrecognized becomes an empty object.
#[must_use]
pub fn mock_output(schema: &Value) -> Value {
    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return json!({});
    };
    let mut out = serde_json::Map::new();
    for (name, prop) in props {
        let value = match prop.get("type").and_then(Value::as_str) {
            Some("string") => json!(format!("mock-{name}")),
            Some("number") | Some("integer") => json!(0),
            Some("boolean") => json!(false),
            Some("array") => json!([]),
            _ => json!({}),
        };
        out.insert(name.clone(), value);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_lookup_by_kind() {
        let registry = WorkerRegistry::with_builtins();
        assert!(registry.contains("echo"));
        assert!(registry.contains("transform"));
        assert!(registry.contains("http"));
        assert!(!registry.contains("nonexistent"));
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn mock_output_follows_schema_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string"},
                "count": {"type": "integer"},
                "ok": {"type": "boolean"},
                "items": {"type": "array"}
            }
        });
        let out = mock_output(&schema);
        assert_eq!(out["summary"], json!("mock-summary"));
        assert_eq!(out["count"], json!(0));
        assert_eq!(out["ok"], json!(false));
        assert_eq!(out["items"], json!([]));
    }

    #[test]
    fn mock_output_without_properties_is_empty_object() {
        assert_eq!(mock_output(&json!({"type": "object"})), json!({}));
    }
}
