//! Worker dispatch.
//!
//! The dispatcher resolves a worker kind, handles the mock-mode fallback
//! for missing credentials, and normalizes invocation results into a
//! [`DispatchOutcome`] the engine folds into node state. Async timeout
//! enforcement lives in the engine (it owns the CAS that fails the node);
//! the dispatcher only reports how the invocation itself went.

use serde_json::Value;
use std::sync::Arc;
use tracing::{instrument, warn};

use crate::config::{EngineConfig, EngineMode};
use crate::workers::{mock_output, DispatchMode, WorkerContext, WorkerRegistry};

/// Result of dispatching one node to its worker.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchOutcome {
    /// Sync worker returned an output.
    Completed(Value),
    /// Invocation failed; the node transitions to failed with this text.
    Failed(String),
    /// Async worker accepted the hand-off; output arrives via callback.
    AsyncPending,
}

/// Resolves worker kinds and invokes them.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    config: Arc<EngineConfig>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<WorkerRegistry>, config: Arc<EngineConfig>) -> Self {
        Self { registry, config }
    }

    /// Invoke `worker_kind` for `(run_id, node_id)`.
    ///
    /// The registry was consulted at compile time, so an unknown kind here
    /// indicates a registry change between versioning and execution; it
    /// fails the node rather than panicking.
    #[instrument(skip(self, input, node_config), fields(kind = worker_kind))]
    pub async fn dispatch(
        &self,
        run_id: &str,
        node_id: &str,
        worker_kind: &str,
        input: Value,
        node_config: Value,
        callback_url: String,
    ) -> DispatchOutcome {
        let Some(worker) = self.registry.get(worker_kind) else {
            return DispatchOutcome::Failed(format!(
                "worker kind {worker_kind:?} is not registered"
            ));
        };

        // Mock fallback is an explicit configuration knob. In production
        // without the knob, a missing credential is a hard failure so a
        // misconfiguration can never silently degrade into synthetic data.
        if let Some(var) = worker.required_credential() {
            if std::env::var(var).is_err() {
                if self.config.allow_mock_workers {
                    warn!(worker = worker_kind, credential = var, "mock fallback engaged");
                    return DispatchOutcome::Completed(mock_output(&worker.output_schema()));
                }
                return DispatchOutcome::Failed(format!(
                    "worker {worker_kind:?} missing credential {var} (mode {:?})",
                    self.config.mode
                ));
            }
        }

        let ctx = WorkerContext {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            callback_url: (worker.mode() == DispatchMode::Async).then_some(callback_url),
            config: node_config,
        };

        match worker.mode() {
            DispatchMode::Sync => match worker.invoke(input, ctx).await {
                Ok(output) => DispatchOutcome::Completed(output),
                Err(err) => DispatchOutcome::Failed(err.to_string()),
            },
            DispatchMode::Async => match worker.invoke(input, ctx).await {
                Ok(_) => DispatchOutcome::AsyncPending,
                Err(err) => DispatchOutcome::Failed(err.to_string()),
            },
        }
    }

    /// Timeout configured for a worker kind.
    #[must_use]
    pub fn timeout_for(&self, worker_kind: &str) -> std::time::Duration {
        self.config.timeout_for(worker_kind)
    }

    #[must_use]
    pub fn mode(&self) -> EngineMode {
        self.config.mode
    }
}
