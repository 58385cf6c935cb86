//! Entities: business subjects traveling a flow's graph.
//!
//! An entity records the journey a subject (a lead, a customer) takes as
//! nodes complete. Its position is either a node or an edge-in-progress,
//! never both; movement methods maintain that invariant. Entity position
//! is orthogonal to the execution status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::graphs::EntityKind;

/// A business subject attached to a flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub flow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Free-form attributes extracted from webhook payloads or API calls.
    #[serde(default)]
    pub attributes: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_kind: Option<EntityKind>,
    /// Current resting node; `None` while traveling an edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_node_id: Option<String>,
    /// Edge currently being traveled; `None` while at a node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_edge_id: Option<String>,
    /// Progress along `current_edge_id` in `[0, 1]`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_progress: Option<f64>,
    /// Where the edge travel ends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_node_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Entity {
    #[must_use]
    pub fn new(flow_id: &str, email: Option<String>, attributes: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            flow_id: flow_id.to_string(),
            email,
            attributes,
            entity_kind: None,
            current_node_id: None,
            current_edge_id: None,
            edge_progress: None,
            destination_node_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Place the entity at a node, clearing any edge travel.
    pub fn arrive_at(&mut self, node_id: &str) {
        self.current_node_id = Some(node_id.to_string());
        self.current_edge_id = None;
        self.edge_progress = None;
        self.destination_node_id = None;
        self.updated_at = Utc::now();
    }

    /// Put the entity on an edge toward `destination`, leaving any node.
    pub fn travel(&mut self, edge_id: &str, destination: &str, progress: f64) {
        self.current_node_id = None;
        self.current_edge_id = Some(edge_id.to_string());
        self.edge_progress = Some(progress.clamp(0.0, 1.0));
        self.destination_node_id = Some(destination.to_string());
        self.updated_at = Utc::now();
    }

    /// Merge new attributes over existing ones (shallow, new wins).
    pub fn absorb_attributes(&mut self, incoming: &Value) {
        match (&mut self.attributes, incoming) {
            (Value::Object(existing), Value::Object(new)) => {
                for (k, v) in new {
                    existing.insert(k.clone(), v.clone());
                }
            }
            (slot, new) if !new.is_null() => *slot = new.clone(),
            _ => {}
        }
        self.updated_at = Utc::now();
    }
}
