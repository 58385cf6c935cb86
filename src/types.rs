//! Core types for the flowrun workflow engine.
//!
//! This module defines the fundamental vocabulary used throughout the system
//! for classifying nodes and edges and for tracking per-node execution
//! status. These are the domain concepts that define what a workflow *is*;
//! runtime records (runs, node states) live in [`crate::state`].
//!
//! # Key Types
//!
//! - [`NodeType`]: classifies nodes in a graph (worker, UX gate, splitter, …)
//! - [`EdgeType`]: journey edges gate readiness, system edges never do
//! - [`NodeStatus`]: the per-node state machine within a run
//! - [`RunStatus`]: the terminal status of a whole run
//!
//! # Examples
//!
//! ```rust
//! use flowrun::types::{NodeStatus, NodeType};
//!
//! let status = NodeStatus::Pending;
//! assert!(status.permits(NodeStatus::Running));
//! assert!(!status.permits(NodeStatus::Completed));
//!
//! // Encoded forms are stable and human readable.
//! assert_eq!(NodeStatus::WaitingForUser.as_str(), "waiting_for_user");
//! assert_eq!(NodeType::Splitter.as_str(), "Splitter");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classifies a node within a workflow graph.
///
/// Two casings for node types historically coexisted in visual graphs
/// produced by different editor builds; serde aliases accept both and the
/// canonical capitalized form is what the engine stores and re-emits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    /// Compute node dispatched to a registered worker kind.
    #[serde(alias = "worker")]
    Worker,
    /// Human-in-the-loop gate; suspends until an external completion call.
    #[serde(rename = "UX", alias = "ux", alias = "Ux")]
    Ux,
    /// Fan-out node that enumerates branches and seeds each downstream target.
    #[serde(alias = "splitter")]
    Splitter,
    /// Fan-in node that aggregates all inbound branches into one output.
    #[serde(alias = "collector")]
    Collector,
    /// Grouping/landing node; executes as a pass-through.
    #[serde(alias = "section")]
    Section,
}

impl NodeType {
    /// Canonical string form used in persisted graphs and log output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Worker => "Worker",
            NodeType::Ux => "UX",
            NodeType::Splitter => "Splitter",
            NodeType::Collector => "Collector",
            NodeType::Section => "Section",
        }
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies an edge within a workflow graph.
///
/// Journey edges create logical dependencies: a target fires only when all
/// of its journey upstreams have completed. System edges trigger their
/// target once as a side effect and never participate in readiness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeType {
    /// Dependency-creating edge; participates in readiness checks.
    #[default]
    Journey,
    /// Side-effect edge; fires its target without gating readiness.
    System,
}

impl EdgeType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Journey => "journey",
            EdgeType::System => "system",
        }
    }
}

impl fmt::Display for EdgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-node execution status within a run.
///
/// The permitted transitions form a small state machine:
///
/// | From               | To                 | Trigger                     |
/// |--------------------|--------------------|-----------------------------|
/// | `Pending`          | `Running`          | engine dispatches the node  |
/// | `Running`          | `Completed`        | worker success              |
/// | `Running`          | `Failed`           | worker / dispatch error     |
/// | `Running`          | `WaitingForUser`   | UX node suspends            |
/// | `WaitingForUser`   | `Completed`        | UX completion endpoint      |
/// | `Failed`           | `Pending`          | retry request               |
/// | any                | same               | idempotent replay (no-op)   |
///
/// Self-transitions are always admitted so that at-least-once delivery of
/// worker callbacks cannot wedge a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    WaitingForUser,
    Completed,
    Failed,
}

impl NodeStatus {
    /// Stable snake_case encoding used in persisted node states and the API.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::WaitingForUser => "waiting_for_user",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
        }
    }

    /// Decode the persisted form. Returns `None` for unknown strings so that
    /// storage corruption surfaces as an error rather than a default.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(NodeStatus::Pending),
            "running" => Some(NodeStatus::Running),
            "waiting_for_user" => Some(NodeStatus::WaitingForUser),
            "completed" => Some(NodeStatus::Completed),
            "failed" => Some(NodeStatus::Failed),
            _ => None,
        }
    }

    /// Whether the state machine permits `self -> to`.
    #[must_use]
    pub fn permits(&self, to: NodeStatus) -> bool {
        use NodeStatus::*;
        if *self == to {
            return true;
        }
        matches!(
            (*self, to),
            (Pending, Running)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, WaitingForUser)
                | (WaitingForUser, Completed)
                | (Failed, Pending)
        )
    }

    /// Whether this status is terminal for the node (completed or failed).
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, NodeStatus::Completed | NodeStatus::Failed)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "completed" => Some(RunStatus::Completed),
            "failed" => Some(RunStatus::Failed),
            "cancelled" => Some(RunStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal runs accept no further scheduling.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
