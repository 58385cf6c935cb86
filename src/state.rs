//! Persistent records: flows, versions, runs, and per-node state.
//!
//! A [`Run`] references an immutable [`Version`] snapshot and carries the
//! node-states map the engine walks. All execution-time mutation of node
//! states goes through the store's atomic primitives; these types are the
//! plain data they operate on.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::graphs::{ExecutionGraph, VisualGraph};
use crate::types::{NodeStatus, RunStatus};

/// A named workflow. The `current_version_id` pointer may advance; the
/// version records it points at never change.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Flow {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Flow {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            current_version_id: None,
            created_at: Utc::now(),
        }
    }
}

/// An immutable snapshot of a flow: the visual graph as submitted and the
/// execution graph compiled from it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub flow_id: String,
    pub visual_graph: VisualGraph,
    pub execution_graph: ExecutionGraph,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Version listing entry. Graphs are intentionally excluded: history
/// listings are frequent and the graphs dominate record size.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VersionMeta {
    pub id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<&Version> for VersionMeta {
    fn from(v: &Version) -> Self {
        Self {
            id: v.id.clone(),
            flow_id: v.flow_id.clone(),
            commit_message: v.commit_message.clone(),
            created_at: v.created_at,
        }
    }
}

/// Identifies where an input-merge patch came from: the upstream node and
/// the edge that carried it.
///
/// The derived ordering (upstream id, then edge id) is the tie-break for
/// colliding input keys: when two upstreams write the same key of a shared
/// downstream input, the patch with the greater source wins, regardless of
/// which completion happened to reach the store first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MergeSource {
    pub upstream_id: String,
    pub edge_id: String,
}

impl MergeSource {
    #[must_use]
    pub fn new(upstream_id: impl Into<String>, edge_id: impl Into<String>) -> Self {
        Self {
            upstream_id: upstream_id.into(),
            edge_id: edge_id.into(),
        }
    }

    /// Source for run-creation seeding. Sorts before every edge-borne
    /// patch, so any real upstream output overwrites a seed on collision.
    #[must_use]
    pub fn initial() -> Self {
        Self {
            upstream_id: String::new(),
            edge_id: String::new(),
        }
    }
}

/// One arrival recorded by a collector node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CollectorArrival {
    pub upstream: String,
    pub payload: Value,
}

/// Fan-in bookkeeping held inside a collector's node state.
///
/// `expected` is frozen at the first arrival; `arrived` guards against
/// duplicate deliveries of the same upstream completion. The `BTreeSet`
/// doubles as the deterministic (lexicographic) aggregation order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectorTracking {
    pub expected: usize,
    #[serde(default)]
    pub received: Vec<CollectorArrival>,
    #[serde(default)]
    pub arrived: BTreeSet<String>,
}

impl CollectorTracking {
    /// Whether every expected branch has arrived.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.expected > 0 && self.arrived.len() == self.expected
    }

    /// Aggregate arrivals as a list ordered by upstream id (the default
    /// collector policy).
    #[must_use]
    pub fn aggregate_list(&self) -> Value {
        let by_upstream: BTreeMap<&str, &Value> = self
            .received
            .iter()
            .map(|a| (a.upstream.as_str(), &a.payload))
            .collect();
        Value::Array(by_upstream.into_values().cloned().collect())
    }

    /// Aggregate arrivals as an object keyed by upstream id.
    #[must_use]
    pub fn aggregate_map(&self) -> Value {
        let mut out = serde_json::Map::new();
        for arrival in &self.received {
            out.insert(arrival.upstream.clone(), arrival.payload.clone());
        }
        Value::Object(out)
    }
}

/// Per-node record within a run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    /// Which [`MergeSource`] last won each stored-input key; consulted by
    /// the input-merge primitive to keep collisions deterministic.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub input_sources: BTreeMap<String, MergeSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collector: Option<CollectorTracking>,
}

impl NodeState {
    /// Fresh state seeded at run creation.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: NodeStatus::Pending,
            input: None,
            input_sources: BTreeMap::new(),
            output: None,
            error: None,
            collector: None,
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::pending()
    }
}

/// One execution of a flow against an immutable version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub flow_id: String,
    /// Immutable reference; the run always executes this exact snapshot.
    pub version_id: String,
    pub status: RunStatus,
    pub node_states: BTreeMap<String, NodeState>,
    /// Entity whose journey this run advances, when webhook-created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create a run with every node of the graph seeded to `pending`.
    ///
    /// This is the only moment a whole node-states map is written; all
    /// later mutation goes through the store's per-node primitives.
    #[must_use]
    pub fn seeded(flow_id: &str, version_id: &str, oeg: &ExecutionGraph) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            version_id: version_id.to_string(),
            status: RunStatus::Running,
            node_states: oeg
                .nodes
                .keys()
                .map(|id| (id.clone(), NodeState::pending()))
                .collect(),
            entity_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn node_state(&self, node_id: &str) -> Option<&NodeState> {
        self.node_states.get(node_id)
    }
}
