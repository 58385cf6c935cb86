//! In-memory store.
//!
//! Volatile, process-local persistence behind a `RwLock`, mirroring the
//! shape of the SQLite implementation. The write lock serializes the
//! atomic node-state primitives, which is exactly the consistency the
//! trait demands; tests lean on this implementation.

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use std::sync::RwLock;

use crate::entities::Entity;
use crate::state::{CollectorArrival, CollectorTracking, Flow, MergeSource, Run, Version, VersionMeta};
use crate::store::{
    apply_input_merge, apply_node_write, evaluate_cas, CasOutcome, Result, Store, StoreError,
};
use crate::types::{NodeStatus, RunStatus};
use crate::webhooks::{WebhookConfig, WebhookEvent};

#[derive(Default)]
struct Inner {
    flows: FxHashMap<String, Flow>,
    versions: FxHashMap<String, Version>,
    runs: FxHashMap<String, Run>,
    entities: FxHashMap<String, Entity>,
    webhook_configs: FxHashMap<String, WebhookConfig>,
    webhook_events: Vec<WebhookEvent>,
    processed_events: FxHashSet<(String, String)>,
}

/// Process-local [`Store`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|e| StoreError::Backend {
            message: format!("lock poisoned: {e}"),
        })
    }

    /// Recorded webhook events, oldest first (test observability).
    pub fn webhook_events(&self) -> Vec<WebhookEvent> {
        self.read().map(|g| g.webhook_events.clone()).unwrap_or_default()
    }
}

fn run_mut<'a>(inner: &'a mut Inner, run_id: &str) -> Result<&'a mut Run> {
    inner.runs.get_mut(run_id).ok_or_else(|| StoreError::NotFound {
        what: "run",
        id: run_id.to_string(),
    })
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_flow(&self, flow: Flow) -> Result<()> {
        self.write()?.flows.insert(flow.id.clone(), flow);
        Ok(())
    }

    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>> {
        Ok(self.read()?.flows.get(flow_id).cloned())
    }

    async fn update_flow_current_version(&self, flow_id: &str, version_id: &str) -> Result<()> {
        let mut inner = self.write()?;
        let flow = inner.flows.get_mut(flow_id).ok_or_else(|| StoreError::NotFound {
            what: "flow",
            id: flow_id.to_string(),
        })?;
        flow.current_version_id = Some(version_id.to_string());
        Ok(())
    }

    async fn insert_version(&self, version: Version) -> Result<()> {
        let mut inner = self.write()?;
        // Versions are append-only; an id collision is a caller bug.
        if inner.versions.contains_key(&version.id) {
            return Err(StoreError::Conflict {
                message: format!("version {} already exists", version.id),
            });
        }
        inner.versions.insert(version.id.clone(), version);
        Ok(())
    }

    async fn get_version(&self, version_id: &str) -> Result<Option<Version>> {
        Ok(self.read()?.versions.get(version_id).cloned())
    }

    async fn list_version_metadata(&self, flow_id: &str) -> Result<Vec<VersionMeta>> {
        let inner = self.read()?;
        let mut metas: Vec<VersionMeta> = inner
            .versions
            .values()
            .filter(|v| v.flow_id == flow_id)
            .map(VersionMeta::from)
            .collect();
        metas.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(metas)
    }

    async fn create_run(&self, run: Run) -> Result<()> {
        self.write()?.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        Ok(self.read()?.runs.get(run_id).cloned())
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let mut inner = self.write()?;
        let run = run_mut(&mut inner, run_id)?;
        run.status = status;
        run.updated_at = chrono::Utc::now();
        Ok(())
    }

    async fn update_node_state(
        &self,
        run_id: &str,
        node_id: &str,
        expected_from: &[NodeStatus],
        new_status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<CasOutcome> {
        let mut inner = self.write()?;
        let run = run_mut(&mut inner, run_id)?;
        let state = run
            .node_states
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "node state",
                id: format!("{run_id}/{node_id}"),
            })?;

        if !evaluate_cas(node_id, state.status, expected_from, new_status)? {
            return Ok(CasOutcome {
                applied: false,
                current: state.clone(),
            });
        }
        apply_node_write(state, new_status, output, error);
        run.updated_at = chrono::Utc::now();
        Ok(CasOutcome {
            applied: true,
            current: run.node_states[node_id].clone(),
        })
    }

    async fn merge_node_input(
        &self,
        run_id: &str,
        node_id: &str,
        source: MergeSource,
        patch: Value,
    ) -> Result<Value> {
        let mut inner = self.write()?;
        let run = run_mut(&mut inner, run_id)?;
        let state = run
            .node_states
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "node state",
                id: format!("{run_id}/{node_id}"),
            })?;
        let merged = apply_input_merge(state, &source, patch);
        run.updated_at = chrono::Utc::now();
        Ok(merged)
    }

    async fn append_collector_arrival(
        &self,
        run_id: &str,
        node_id: &str,
        upstream: &str,
        payload: Value,
        expected: usize,
    ) -> Result<CollectorTracking> {
        let mut inner = self.write()?;
        let run = run_mut(&mut inner, run_id)?;
        let state = run
            .node_states
            .get_mut(node_id)
            .ok_or_else(|| StoreError::NotFound {
                what: "node state",
                id: format!("{run_id}/{node_id}"),
            })?;
        let tracking = state.collector.get_or_insert_with(|| CollectorTracking {
            expected,
            ..CollectorTracking::default()
        });
        // Idempotency guard: a duplicate upstream completion is absorbed.
        if tracking.arrived.insert(upstream.to_string()) {
            tracking.received.push(CollectorArrival {
                upstream: upstream.to_string(),
                payload,
            });
        }
        let snapshot = tracking.clone();
        run.updated_at = chrono::Utc::now();
        Ok(snapshot)
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        Ok(self.read()?.entities.get(entity_id).cloned())
    }

    async fn find_entity_by_email(&self, flow_id: &str, email: &str) -> Result<Option<Entity>> {
        Ok(self
            .read()?
            .entities
            .values()
            .find(|e| e.flow_id == flow_id && e.email.as_deref() == Some(email))
            .cloned())
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        self.write()?.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    async fn get_webhook_config(&self, slug: &str) -> Result<Option<WebhookConfig>> {
        Ok(self.read()?.webhook_configs.get(slug).cloned())
    }

    async fn put_webhook_config(&self, config: WebhookConfig) -> Result<()> {
        self.write()?
            .webhook_configs
            .insert(config.slug.clone(), config);
        Ok(())
    }

    async fn append_webhook_event(&self, event: WebhookEvent) -> Result<()> {
        self.write()?.webhook_events.push(event);
        Ok(())
    }

    async fn webhook_event_processed(&self, slug: &str, dedup_key: &str) -> Result<bool> {
        let mut inner = self.write()?;
        Ok(!inner
            .processed_events
            .insert((slug.to_string(), dedup_key.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphs::ExecutionGraph;
    use crate::state::NodeState;
    use serde_json::json;

    fn run_with_nodes(nodes: &[&str]) -> Run {
        let mut oeg = ExecutionGraph::default();
        for id in nodes {
            oeg.nodes.insert(
                (*id).to_string(),
                crate::graphs::OegNode {
                    id: (*id).to_string(),
                    node_type: crate::types::NodeType::Worker,
                    worker_kind: Some("echo".to_string()),
                    config: Value::Null,
                    inputs: vec![],
                    outputs: vec![],
                    entity_movement: None,
                },
            );
        }
        Run::seeded("flow", "version", &oeg)
    }

    #[tokio::test]
    async fn cas_applies_only_from_expected_states() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        let outcome = store
            .update_node_state(&run_id, "a", &[NodeStatus::Pending], NodeStatus::Running, None, None)
            .await
            .unwrap();
        assert!(outcome.applied);

        // Second dispatch attempt observes running, not pending.
        let outcome = store
            .update_node_state(&run_id, "a", &[NodeStatus::Pending], NodeStatus::Running, None, None)
            .await
            .unwrap();
        assert!(!outcome.applied);
        assert_eq!(outcome.current.status, NodeStatus::Running);
    }

    #[tokio::test]
    async fn cas_rejects_fsm_violations() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        let err = store
            .update_node_state(
                &run_id,
                "a",
                &[NodeStatus::Pending],
                NodeStatus::Completed,
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn retry_clears_output_and_error() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        store
            .update_node_state(&run_id, "a", &[NodeStatus::Pending], NodeStatus::Running, None, None)
            .await
            .unwrap();
        store
            .update_node_state(
                &run_id,
                "a",
                &[NodeStatus::Running],
                NodeStatus::Failed,
                None,
                Some("boom".to_string()),
            )
            .await
            .unwrap();
        let outcome = store
            .update_node_state(&run_id, "a", &[NodeStatus::Failed], NodeStatus::Pending, None, None)
            .await
            .unwrap();
        assert!(outcome.applied);
        assert_eq!(outcome.current.error, None);
        assert_eq!(outcome.current.output, None);
    }

    #[tokio::test]
    async fn collector_append_is_idempotent_per_upstream() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["c"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        let t1 = store
            .append_collector_arrival(&run_id, "c", "w1", json!("a"), 2)
            .await
            .unwrap();
        assert_eq!(t1.arrived.len(), 1);
        let t2 = store
            .append_collector_arrival(&run_id, "c", "w1", json!("a-again"), 2)
            .await
            .unwrap();
        assert_eq!(t2.arrived.len(), 1, "duplicate upstream must be absorbed");
        assert_eq!(t2.received.len(), 1);
        let t3 = store
            .append_collector_arrival(&run_id, "c", "w2", json!("b"), 2)
            .await
            .unwrap();
        assert!(t3.is_complete());
    }

    #[tokio::test]
    async fn merge_node_input_accumulates_keys() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        store
            .merge_node_input(&run_id, "a", MergeSource::new("u1", "e1"), json!({"x": 1}))
            .await
            .unwrap();
        let merged = store
            .merge_node_input(&run_id, "a", MergeSource::new("u2", "e2"), json!({"y": 2}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"x": 1, "y": 2}));
    }

    #[tokio::test]
    async fn colliding_keys_resolve_by_source_order_not_arrival_order() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        // The later source (by upstream id) arrives first; the earlier
        // source's write must lose the key even though it lands last.
        store
            .merge_node_input(
                &run_id,
                "a",
                MergeSource::new("beta", "e2"),
                json!({"shared": "from-beta", "only_beta": 2}),
            )
            .await
            .unwrap();
        let merged = store
            .merge_node_input(
                &run_id,
                "a",
                MergeSource::new("alpha", "e1"),
                json!({"shared": "from-alpha", "only_alpha": 1}),
            )
            .await
            .unwrap();
        assert_eq!(
            merged,
            json!({"shared": "from-beta", "only_alpha": 1, "only_beta": 2})
        );

        // Arrival in source order gives the identical result.
        let run2 = run_with_nodes(&["a"]);
        let run2_id = run2.id.clone();
        store.create_run(run2).await.unwrap();
        store
            .merge_node_input(
                &run2_id,
                "a",
                MergeSource::new("alpha", "e1"),
                json!({"shared": "from-alpha", "only_alpha": 1}),
            )
            .await
            .unwrap();
        let merged2 = store
            .merge_node_input(
                &run2_id,
                "a",
                MergeSource::new("beta", "e2"),
                json!({"shared": "from-beta", "only_beta": 2}),
            )
            .await
            .unwrap();
        assert_eq!(merged, merged2);
    }

    #[tokio::test]
    async fn edge_id_breaks_ties_between_same_upstream_patches() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        // Two parallel edges from the same upstream; the greater edge id
        // owns the colliding key in either arrival order.
        store
            .merge_node_input(&run_id, "a", MergeSource::new("u", "e9"), json!({"k": "e9"}))
            .await
            .unwrap();
        let merged = store
            .merge_node_input(&run_id, "a", MergeSource::new("u", "e1"), json!({"k": "e1"}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"k": "e9"}));
    }

    #[tokio::test]
    async fn initial_seed_loses_to_any_upstream_patch() {
        let store = MemoryStore::new();
        let run = run_with_nodes(&["a"]);
        let run_id = run.id.clone();
        store.create_run(run).await.unwrap();

        store
            .merge_node_input(&run_id, "a", MergeSource::initial(), json!({"k": "seed"}))
            .await
            .unwrap();
        let merged = store
            .merge_node_input(&run_id, "a", MergeSource::new("u", "e1"), json!({"k": "real"}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"k": "real"}));
    }

    #[tokio::test]
    async fn versions_are_append_only() {
        let store = MemoryStore::new();
        let version = Version {
            id: "v1".to_string(),
            flow_id: "f".to_string(),
            visual_graph: crate::graphs::VisualGraph::default(),
            execution_graph: ExecutionGraph::default(),
            commit_message: None,
            created_at: chrono::Utc::now(),
        };
        store.insert_version(version.clone()).await.unwrap();
        assert!(matches!(
            store.insert_version(version).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn node_state_map_is_seeded_pending() {
        let run = run_with_nodes(&["a", "b"]);
        assert_eq!(run.node_states.len(), 2);
        assert!(run
            .node_states
            .values()
            .all(|s| *s == NodeState::pending()));
    }
}
