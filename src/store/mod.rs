//! Persistence interface and implementations.
//!
//! The engine is stateless; every piece of coordination between concurrent
//! node completions goes through the [`Store`]'s atomic primitives:
//!
//! - [`Store::update_node_state`]: compare-and-swap on one node's status
//!   sub-record (the FSM validator lives inside this operation)
//! - [`Store::merge_node_input`]: atomic read-merge-write of one node's
//!   stored input; racing upstream propagations never lose keys, and a
//!   colliding key goes to the greatest `(upstream id, edge id)` source,
//!   not to whichever write reached the store last
//! - [`Store::append_collector_arrival`]: atomic fan-in bookkeeping
//!
//! Bulk writes to a run's node-states map are forbidden after creation;
//! only the initial seeding writes the whole map.
//!
//! Two implementations mirror each other: [`MemoryStore`] (authoritative
//! for tests, volatile) and `SqliteStore` (durable, behind the `sqlite`
//! feature).

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::entities::Entity;
use crate::state::{CollectorTracking, Flow, MergeSource, NodeState, Run, Version, VersionMeta};
use crate::types::{NodeStatus, RunStatus};
use crate::webhooks::{WebhookConfig, WebhookEvent};

/// Errors from store operations.
#[derive(Debug, Error, Diagnostic)]
pub enum StoreError {
    #[error("{what} not found: {id}")]
    #[diagnostic(code(flowrun::store::not_found))]
    NotFound { what: &'static str, id: String },

    #[error("invalid status transition on node {node_id}: {from} -> {to}")]
    #[diagnostic(
        code(flowrun::store::invalid_transition),
        help("Only the documented node status transitions are permitted; see types::NodeStatus.")
    )]
    InvalidTransition {
        node_id: String,
        from: NodeStatus,
        to: NodeStatus,
    },

    #[error("store conflict: {message}")]
    #[diagnostic(code(flowrun::store::conflict))]
    Conflict { message: String },

    #[error("backend error: {message}")]
    #[diagnostic(code(flowrun::store::backend))]
    Backend { message: String },

    #[error("serialization error: {source}")]
    #[diagnostic(code(flowrun::store::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a node-state compare-and-swap.
#[derive(Clone, Debug, PartialEq)]
pub struct CasOutcome {
    /// Whether the write was applied. `false` means the node was not in
    /// any of the expected statuses at the moment of the write.
    pub applied: bool,
    /// The node state after the operation (post-write when applied,
    /// the untouched current state when not).
    pub current: NodeState,
}

/// Abstract persistence backend.
///
/// Implementations must make the three node-state primitives atomic with
/// respect to each other per `(run, node)`; everything else is plain CRUD.
#[async_trait]
pub trait Store: Send + Sync {
    // Flows
    async fn create_flow(&self, flow: Flow) -> Result<()>;
    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>>;
    /// Atomically advance a flow's current-version pointer.
    async fn update_flow_current_version(&self, flow_id: &str, version_id: &str) -> Result<()>;

    // Versions (append-only)
    async fn insert_version(&self, version: Version) -> Result<()>;
    async fn get_version(&self, version_id: &str) -> Result<Option<Version>>;
    /// Metadata only, newest first.
    async fn list_version_metadata(&self, flow_id: &str) -> Result<Vec<VersionMeta>>;

    // Runs
    async fn create_run(&self, run: Run) -> Result<()>;
    async fn get_run(&self, run_id: &str) -> Result<Option<Run>>;
    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()>;

    /// Compare-and-swap one node's status.
    ///
    /// Applies `new_status` (plus optional output/error) only when the
    /// node's current status is in `expected_from`. The FSM is validated
    /// inside the operation: an expected-from entry that does not permit
    /// `new_status` is an [`StoreError::InvalidTransition`].
    async fn update_node_state(
        &self,
        run_id: &str,
        node_id: &str,
        expected_from: &[NodeStatus],
        new_status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<CasOutcome>;

    /// Atomically merge `patch` (attributed to `source`) into the node's
    /// stored input and return the merged value.
    ///
    /// No key is ever silently dropped, and collisions are deterministic:
    /// when two sources write the same key, the greater `(upstream id,
    /// edge id)` wins no matter which write reaches the store first. The
    /// final input is therefore as if patches had been applied in sorted
    /// source order.
    async fn merge_node_input(
        &self,
        run_id: &str,
        node_id: &str,
        source: MergeSource,
        patch: Value,
    ) -> Result<Value>;

    /// Atomically record one fan-in arrival and return the updated
    /// tracking record. `expected` freezes the branch count at the first
    /// arrival; duplicate upstreams are ignored.
    async fn append_collector_arrival(
        &self,
        run_id: &str,
        node_id: &str,
        upstream: &str,
        payload: Value,
        expected: usize,
    ) -> Result<CollectorTracking>;

    // Entities (scoped by flow)
    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>>;
    async fn find_entity_by_email(&self, flow_id: &str, email: &str) -> Result<Option<Entity>>;
    /// Insert or replace by id.
    async fn upsert_entity(&self, entity: Entity) -> Result<()>;

    // Webhooks
    async fn get_webhook_config(&self, slug: &str) -> Result<Option<WebhookConfig>>;
    async fn put_webhook_config(&self, config: WebhookConfig) -> Result<()>;
    /// Append to the webhook event log (success and failure alike).
    async fn append_webhook_event(&self, event: WebhookEvent) -> Result<()>;
    /// Check-and-record a processed event key; returns `true` when the
    /// key was already recorded (replay).
    async fn webhook_event_processed(&self, slug: &str, dedup_key: &str) -> Result<bool>;
}

/// Validate a CAS request against the FSM and the current status.
///
/// Shared by both store implementations so the transition rules cannot
/// drift between backends.
pub(crate) fn evaluate_cas(
    node_id: &str,
    current: NodeStatus,
    expected_from: &[NodeStatus],
    new_status: NodeStatus,
) -> Result<bool> {
    if !expected_from.contains(&current) {
        return Ok(false);
    }
    if !current.permits(new_status) {
        return Err(StoreError::InvalidTransition {
            node_id: node_id.to_string(),
            from: current,
            to: new_status,
        });
    }
    Ok(true)
}

/// Apply an accepted CAS to a node state in place.
pub(crate) fn apply_node_write(
    state: &mut NodeState,
    new_status: NodeStatus,
    output: Option<Value>,
    error: Option<String>,
) {
    state.status = new_status;
    if new_status == NodeStatus::Pending {
        // Retry: start from a clean slate, keeping the stored input.
        state.output = None;
        state.error = None;
        return;
    }
    if let Some(output) = output {
        state.output = Some(output);
        state.error = None;
    }
    if let Some(error) = error {
        state.error = Some(error);
    }
}

/// Merge a patch into a node's stored input in place, returning the merged
/// value.
///
/// Shared by both store implementations so the collision rule cannot drift
/// between backends: for object patches, each key records the source that
/// wrote it, and an incoming value loses only to a strictly greater
/// recorded source. Primitive patches (splitter seeds, scalar outputs)
/// take the `{input, output}` wrapping path and carry no per-key
/// provenance.
pub(crate) fn apply_input_merge(state: &mut NodeState, source: &MergeSource, patch: Value) -> Value {
    use crate::utils::json_ext::merge_io;

    let base = state.input.take().unwrap_or(Value::Null);
    let merged = match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            merge_object_patch(base, patch, state, source)
        }
        (Value::Null, Value::Object(patch)) => {
            merge_object_patch(serde_json::Map::new(), patch, state, source)
        }
        (base, patch) => merge_io(base, patch),
    };
    state.input = Some(merged.clone());
    merged
}

fn merge_object_patch(
    mut base: serde_json::Map<String, Value>,
    patch: serde_json::Map<String, Value>,
    state: &mut NodeState,
    source: &MergeSource,
) -> Value {
    for (key, value) in patch {
        // A strictly later source already owns this key; the earlier
        // patch loses regardless of arrival order.
        let owned_by_later = state
            .input_sources
            .get(&key)
            .is_some_and(|existing| existing > source);
        if !owned_by_later {
            base.insert(key.clone(), value);
            state.input_sources.insert(key, source.clone());
        }
    }
    Value::Object(base)
}
