//! Editor-facing graph model.
//!
//! A [`VisualGraph`] is what the editor (or an API client) submits: ordered
//! nodes and edges with labels, declared inputs/outputs, per-edge mappings,
//! and optional entity-movement rules. The engine never executes a visual
//! graph directly; it is compiled into an [`ExecutionGraph`](super::ExecutionGraph)
//! first, and node identifiers are preserved byte-for-byte through that
//! compilation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::types::{EdgeType, NodeType};

/// User-facing workflow graph: ordered node and edge sequences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualGraph {
    #[serde(default)]
    pub nodes: Vec<VisualNode>,
    #[serde(default)]
    pub edges: Vec<VisualEdge>,
}

impl VisualGraph {
    /// Look up a node by its (opaque) identifier.
    #[must_use]
    pub fn node(&self, id: &str) -> Option<&VisualNode> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A single node in a visual graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualNode {
    /// Stable opaque identifier. Status updates and UI overlays key off
    /// this string, so it is never renamed or sanitized.
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub data: NodeData,
}

/// The data record carried by a node.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Registered worker kind; required for `Worker` nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_kind: Option<String>,
    /// Free-form node configuration (splitter branches, collector
    /// aggregation policy, worker settings).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<InputDecl>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_movement: Option<EntityMovement>,
}

/// A declared input of a node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InputDecl {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl InputDecl {
    /// Convenience constructor for a required input without a default.
    #[must_use]
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: true,
            default: None,
        }
    }

    /// Convenience constructor for an optional input.
    #[must_use]
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            required: false,
            default: None,
        }
    }

    /// Attach a default value (which also satisfies a required input).
    #[must_use]
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Entity-movement rules evaluated when a worker node finishes.
///
/// Entities are orthogonal to the execution status machine; these rules
/// record where a business subject hops when the node succeeds or fails.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMovement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<MovementRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<MovementRule>,
}

/// One movement rule: hop the entity to a target node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRule {
    /// Node id the entity hops to. Must exist in the graph.
    pub target_section_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_as: Option<CompleteAs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_entity_type: Option<EntityKind>,
}

/// How a journey leg is marked when a movement rule fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompleteAs {
    Success,
    Failure,
    Neutral,
}

/// Business classification applied to an entity by a movement rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Customer,
    Lead,
    Churned,
}

/// A single edge in a visual graph.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VisualEdge {
    pub id: String,
    pub source: String,
    pub target: String,
    /// Defaults to `journey` when the editor omits it.
    #[serde(rename = "type", default)]
    pub edge_type: EdgeType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

impl VisualEdge {
    /// The mapping entries declared on this edge, empty when absent.
    #[must_use]
    pub fn mapping(&self) -> &BTreeMap<String, String> {
        static EMPTY: BTreeMap<String, String> = BTreeMap::new();
        self.data.as_ref().map_or(&EMPTY, |d| &d.mapping)
    }
}

/// Edge payload: the input mapping.
///
/// Keys are target-input names; values are source paths into the upstream
/// node's output (`"result"` or `"result.items"`). A `BTreeMap` keeps the
/// wire form and iteration order deterministic.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default)]
    pub mapping: BTreeMap<String, String>,
}
