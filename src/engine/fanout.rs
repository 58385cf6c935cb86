//! Parallel fan-out (splitter) and fan-in (collector).
//!
//! A splitter enumerates branches and seeds one downstream target per
//! branch, then completes with the branch list as its output. A collector
//! accumulates arrivals through the store's atomic append and is fired
//! exactly once, when the final expected branch lands.

use serde_json::{json, Value};
use tracing::{debug, instrument};

use crate::engine::{Engine, EngineError};
use crate::graphs::{ExecutionGraph, OutboundEdge};
use crate::state::{MergeSource, NodeState};
use crate::types::{EdgeType, NodeStatus, NodeType};

impl Engine {
    /// Execute a splitter that has just transitioned to running.
    ///
    /// Branches come from `config.branches` (static list) or from the
    /// input field named by `config.branchSource`. Branch `i` seeds the
    /// `i`-th outgoing journey target; a count mismatch fails the node
    /// rather than guessing an assignment.
    #[instrument(skip(self, input, oeg), err)]
    pub(crate) async fn fire_splitter(
        &self,
        run_id: &str,
        node_id: &str,
        input: Value,
        oeg: &ExecutionGraph,
    ) -> Result<(), EngineError> {
        let node = oeg.node(node_id).ok_or_else(|| EngineError::NodeNotFound {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
        })?;

        let branches = match enumerate_branches(&node.config, &input) {
            Ok(branches) => branches,
            Err(message) => return self.fail_node(run_id, node_id, message).await,
        };

        let journey_targets: Vec<&OutboundEdge> = oeg
            .outbound(node_id)
            .iter()
            .filter(|e| e.edge_type == EdgeType::Journey)
            .collect();
        if branches.len() != journey_targets.len() {
            return self
                .fail_node(
                    run_id,
                    node_id,
                    format!(
                        "splitter enumerated {} branch(es) for {} journey target(s)",
                        branches.len(),
                        journey_targets.len()
                    ),
                )
                .await;
        }

        let indexed = node
            .config
            .get("indexed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        // Seed every target before completing the splitter, so a target
        // observing the splitter as completed always sees its seed.
        let mut collector_targets: Vec<(String, Value)> = Vec::new();
        for (index, (edge, branch)) in journey_targets.iter().zip(&branches).enumerate() {
            let seed = if indexed {
                json!({"index": index, "branch": branch})
            } else {
                branch.clone()
            };
            if oeg.node(&edge.target).map(|n| n.node_type) == Some(NodeType::Collector) {
                collector_targets.push((edge.target.clone(), seed));
            } else {
                self.store
                    .merge_node_input(
                        run_id,
                        &edge.target,
                        MergeSource::new(node_id, edge.id.as_str()),
                        seed,
                    )
                    .await?;
            }
        }

        self.cas_node(
            run_id,
            node_id,
            &[NodeStatus::Running],
            NodeStatus::Completed,
            Some(Value::Array(branches)),
            None,
        )
        .await?;
        debug!(run_id, node_id, targets = journey_targets.len(), "splitter fanned out");

        // Collector targets record an arrival; everything else fires when
        // its upstreams (now including this splitter) are complete.
        for (target, seed) in collector_targets {
            self.record_collector_arrival(run_id, node_id, &target, seed, oeg)
                .await?;
        }
        for edge in &journey_targets {
            if oeg.node(&edge.target).map(|n| n.node_type) == Some(NodeType::Collector) {
                continue;
            }
            if self.upstreams_completed(run_id, &edge.target, oeg).await? {
                self.fire_node(run_id, &edge.target).await?;
            }
        }
        for edge in oeg.outbound(node_id) {
            if edge.edge_type == EdgeType::System
                && oeg.node(&edge.target).map(|n| n.node_type) != Some(NodeType::Collector)
            {
                self.fire_node(run_id, &edge.target).await?;
            }
        }

        self.finalize_if_terminal(run_id).await
    }

    /// Record one fan-in arrival; fire the collector on the final one.
    ///
    /// The store append is atomic and deduplicates by upstream id, so
    /// concurrent completions neither lose arrivals nor double-fire: only
    /// the append that reaches `expected` observes completion, and the
    /// `pending -> running` CAS in `fire_node` backstops it.
    pub(crate) async fn record_collector_arrival(
        &self,
        run_id: &str,
        upstream_id: &str,
        collector_id: &str,
        payload: Value,
        oeg: &ExecutionGraph,
    ) -> Result<(), EngineError> {
        let expected = oeg.upstream(collector_id).len();
        let tracking = self
            .store
            .append_collector_arrival(run_id, collector_id, upstream_id, payload, expected)
            .await?;
        debug!(
            run_id,
            collector_id,
            upstream_id,
            arrived = tracking.arrived.len(),
            expected = tracking.expected,
            "collector arrival"
        );
        if tracking.is_complete() {
            self.fire_node(run_id, collector_id).await?;
        }
        Ok(())
    }

    /// Execute a collector that has just transitioned to running: all
    /// arrivals are in, aggregate and complete.
    pub(crate) async fn fire_collector(
        &self,
        run_id: &str,
        node_id: &str,
        state: &NodeState,
        oeg: &ExecutionGraph,
    ) -> Result<(), EngineError> {
        let node = oeg.node(node_id).ok_or_else(|| EngineError::NodeNotFound {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
        })?;
        let Some(tracking) = &state.collector else {
            return self
                .fail_node(run_id, node_id, "collector fired with no arrivals".to_string())
                .await;
        };

        // Aggregation policy is part of the node configuration; the
        // default list order (upstream id, lexicographic) is documented
        // and callers must not rely on anything beyond that.
        let aggregate = match node.config.get("aggregation").and_then(Value::as_str) {
            Some("map") => tracking.aggregate_map(),
            _ => tracking.aggregate_list(),
        };
        self.complete_node(run_id, node_id, aggregate, &[NodeStatus::Running])
            .await
            .map(|_| ())
    }
}

/// Enumerate splitter branches from config and input.
fn enumerate_branches(config: &Value, input: &Value) -> Result<Vec<Value>, String> {
    if let Some(branches) = config.get("branches").and_then(Value::as_array) {
        if branches.len() < 2 {
            return Err("splitter config.branches needs at least 2 entries".to_string());
        }
        return Ok(branches.clone());
    }
    if let Some(field) = config.get("branchSource").and_then(Value::as_str) {
        return match crate::utils::json_ext::resolve_path(input, field) {
            Some(Value::Array(branches)) if branches.len() >= 2 => Ok(branches),
            Some(Value::Array(_)) => {
                Err(format!("splitter input field {field:?} has fewer than 2 branches"))
            }
            Some(_) => Err(format!("splitter input field {field:?} is not an array")),
            None => Err(format!("splitter input field {field:?} is missing")),
        };
    }
    Err("splitter has neither config.branches nor config.branchSource".to_string())
}
