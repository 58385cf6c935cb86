//! Optimized execution graph (OEG): the runtime-facing compiled form.
//!
//! An [`ExecutionGraph`] is derived from a [`VisualGraph`](super::VisualGraph)
//! by the compiler and stored on a version. It is a pure value: cloned
//! freely, serialized into version records, and never mutated after
//! compilation. All UI properties are stripped; what remains is exactly the
//! indexes the edge-walking engine needs:
//!
//! - `adjacency` / `inbound_edges`: journey-only dependency topology
//! - `outbound_edges`: every edge (system edges appear here only)
//! - `edge_data`: canonical `"source->target"` mapping index
//! - `entry_nodes` / `terminal_nodes`: where runs start and finish
//!
//! Node identifiers are preserved byte-for-byte from the visual graph.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::graphs::visual::{EntityMovement, InputDecl};
use crate::types::{EdgeType, NodeType};

/// A compiled node: execution-relevant fields only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OegNode {
    pub id: String,
    pub node_type: NodeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_movement: Option<EntityMovement>,
}

/// One outbound edge as seen from its source node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundEdge {
    pub id: String,
    pub target: String,
    pub edge_type: EdgeType,
    /// Mapping entries declared on the edge (target input -> source path).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub mapping: BTreeMap<String, String>,
}

/// The compiled, indexed, immutable runtime graph.
///
/// `BTreeMap` containers keep serialization and iteration deterministic,
/// which is what makes recompilation structurally reproducible.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionGraph {
    /// node id -> compiled node.
    pub nodes: BTreeMap<String, OegNode>,
    /// node id -> downstream node ids, journey edges only.
    pub adjacency: BTreeMap<String, Vec<String>>,
    /// node id -> all outbound edges (journey and system).
    pub outbound_edges: BTreeMap<String, Vec<OutboundEdge>>,
    /// node id -> upstream node ids, journey edges only.
    pub inbound_edges: BTreeMap<String, Vec<String>>,
    /// `"source->target"` -> mapping, for fast lookup during propagation.
    pub edge_data: BTreeMap<String, BTreeMap<String, String>>,
    /// Nodes with no inbound journey edges; seeded and fired at run start.
    pub entry_nodes: Vec<String>,
    /// Nodes with no outbound journey edges; their outputs are the run's
    /// final outputs.
    pub terminal_nodes: Vec<String>,
}

impl ExecutionGraph {
    /// Canonical key into [`Self::edge_data`].
    #[must_use]
    pub fn edge_key(source: &str, target: &str) -> String {
        format!("{source}->{target}")
    }

    #[must_use]
    pub fn node(&self, id: &str) -> Option<&OegNode> {
        self.nodes.get(id)
    }

    /// Journey downstream ids of `id` (empty slice when none).
    #[must_use]
    pub fn downstream(&self, id: &str) -> &[String] {
        self.adjacency.get(id).map_or(&[], Vec::as_slice)
    }

    /// Journey upstream ids of `id` (empty slice when none).
    #[must_use]
    pub fn upstream(&self, id: &str) -> &[String] {
        self.inbound_edges.get(id).map_or(&[], Vec::as_slice)
    }

    /// All outbound edges of `id`, system edges included.
    #[must_use]
    pub fn outbound(&self, id: &str) -> &[OutboundEdge] {
        self.outbound_edges.get(id).map_or(&[], Vec::as_slice)
    }

    /// Mapping declared on the `source -> target` edge, if any.
    #[must_use]
    pub fn mapping(&self, source: &str, target: &str) -> Option<&BTreeMap<String, String>> {
        self.edge_data.get(&Self::edge_key(source, target))
    }

    #[must_use]
    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminal_nodes.iter().any(|n| n == id)
    }
}
