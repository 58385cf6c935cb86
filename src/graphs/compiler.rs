//! Graph compiler: visual graph in, optimized execution graph out.
//!
//! Compilation runs every validation pass and returns the full error list
//! rather than failing fast, so the editor can surface all problems at
//! once. The passes:
//!
//! 1. cycle detection on the journey subgraph (three-color DFS)
//! 2. required-input satisfiability (default or explicit inbound mapping)
//! 3. worker kind registration
//! 4. edge mapping validity (endpoints, target inputs, source paths)
//! 5. splitter/collector pairing
//! 6. entity-movement target validity
//!
//! Compilation is pure and deterministic: identical input graphs produce
//! structurally equal execution graphs, and node identifiers pass through
//! untouched.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::graphs::oeg::{ExecutionGraph, OegNode, OutboundEdge};
use crate::graphs::visual::{MovementRule, VisualGraph};
use crate::types::{EdgeType, NodeType};
use crate::utils::json_ext::validate_path;
use crate::workers::WorkerRegistry;

/// The kind of a single validation error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileErrorKind {
    Cycle,
    MissingInput,
    InvalidWorker,
    InvalidMapping,
    SplitterCollectorMismatch,
    InvalidEntityMovement,
}

/// One structured validation error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub message: String,
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Returned when any validation pass rejects the graph.
///
/// Carries the complete error list; compilation is never partially applied.
#[derive(Clone, Debug, Error, Diagnostic, Serialize, Deserialize)]
#[error("graph validation failed with {} error(s)", errors.len())]
#[diagnostic(
    code(flowrun::compiler::validation),
    help("Fix every listed error; compilation collects all passes before reporting.")
)]
pub struct CompileFailure {
    pub errors: Vec<CompileError>,
}

impl CompileFailure {
    /// Whether any error of the given kind is present.
    #[must_use]
    pub fn has_kind(&self, kind: CompileErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind == kind)
    }
}

/// Compile a visual graph into an execution graph.
///
/// `registry` supplies the set of registered worker kinds for pass 3.
///
/// # Errors
///
/// Returns [`CompileFailure`] with every validation error found. On success
/// the returned [`ExecutionGraph`] satisfies all structural invariants
/// (acyclic journey subgraph, satisfiable required inputs, closed edge
/// endpoints).
pub fn compile(
    graph: &VisualGraph,
    registry: &WorkerRegistry,
) -> Result<ExecutionGraph, CompileFailure> {
    let mut errors: Vec<CompileError> = Vec::new();

    let node_ids: FxHashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    // Journey adjacency used by the structural passes. Edges with unknown
    // endpoints are reported by pass 4 and excluded here.
    let mut journey_adj: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    let mut journey_inbound: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
    for edge in &graph.edges {
        if edge.edge_type != EdgeType::Journey {
            continue;
        }
        if node_ids.contains(edge.source.as_str()) && node_ids.contains(edge.target.as_str()) {
            journey_adj
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
            journey_inbound
                .entry(edge.target.as_str())
                .or_default()
                .push(edge.source.as_str());
        }
    }

    check_cycles(graph, &journey_adj, &mut errors);
    check_required_inputs(graph, &mut errors);
    check_worker_kinds(graph, registry, &mut errors);
    check_edge_mappings(graph, &node_ids, &mut errors);
    check_splitter_collector(graph, &journey_adj, &journey_inbound, &mut errors);
    check_entity_movement(graph, &node_ids, &mut errors);

    if !errors.is_empty() {
        return Err(CompileFailure { errors });
    }

    Ok(build_execution_graph(graph))
}

/// Pass 1: three-color DFS over the journey subgraph. A back edge means a
/// cycle; the cycle is reported as the ordered node-id path.
fn check_cycles(
    graph: &VisualGraph,
    adj: &FxHashMap<&str, Vec<&str>>,
    errors: &mut Vec<CompileError>,
) {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    let mut color: FxHashMap<&str, Color> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Color::White))
        .collect();

    // Iterative DFS keeping the gray path so the cycle can be reported in
    // order. Each stack frame is (node, next-child-index).
    for root in graph.nodes.iter().map(|n| n.id.as_str()) {
        if color.get(root) != Some(&Color::White) {
            continue;
        }
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        color.insert(root, Color::Gray);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            let children = adj.get(node).map_or(&[][..], Vec::as_slice);
            if frame.1 < children.len() {
                let child = children[frame.1];
                frame.1 += 1;
                match color.get(child) {
                    Some(Color::White) => {
                        color.insert(child, Color::Gray);
                        stack.push((child, 0));
                    }
                    Some(Color::Gray) => {
                        // Back edge: the cycle is the gray path from `child`
                        // to the current node, closed by this edge.
                        let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(n, _)| (*n).to_string()).collect();
                        cycle.push(child.to_string());
                        errors.push(CompileError {
                            kind: CompileErrorKind::Cycle,
                            node_id: Some(child.to_string()),
                            edge_id: None,
                            field: None,
                            message: format!("journey cycle: {}", cycle.join(" -> ")),
                        });
                        // One report per cycle entry point is enough.
                        return;
                    }
                    _ => {}
                }
            } else {
                color.insert(node, Color::Black);
                stack.pop();
            }
        }
    }
}

/// Pass 2: every required input either has a default or is named by the
/// mapping of at least one inbound journey edge. An unmapped inbound edge
/// does not satisfy anything; the runtime cannot guess which upstream field
/// feeds which input.
fn check_required_inputs(graph: &VisualGraph, errors: &mut Vec<CompileError>) {
    for node in &graph.nodes {
        for input in &node.data.inputs {
            if !input.required || input.default.is_some() {
                continue;
            }
            let mapped = graph.edges.iter().any(|e| {
                e.edge_type == EdgeType::Journey
                    && e.target == node.id
                    && e.mapping().contains_key(&input.name)
            });
            if !mapped {
                errors.push(CompileError {
                    kind: CompileErrorKind::MissingInput,
                    node_id: Some(node.id.clone()),
                    edge_id: None,
                    field: Some(input.name.clone()),
                    message: format!(
                        "required input {:?} of node {:?} has no default and no inbound mapping",
                        input.name, node.id
                    ),
                });
            }
        }
    }
}

/// Pass 3: worker nodes must name a registered worker kind.
fn check_worker_kinds(
    graph: &VisualGraph,
    registry: &WorkerRegistry,
    errors: &mut Vec<CompileError>,
) {
    for node in &graph.nodes {
        if node.node_type != NodeType::Worker {
            continue;
        }
        match node.data.worker_kind.as_deref() {
            None | Some("") => errors.push(CompileError {
                kind: CompileErrorKind::InvalidWorker,
                node_id: Some(node.id.clone()),
                edge_id: None,
                field: Some("workerKind".to_string()),
                message: format!("worker node {:?} declares no worker kind", node.id),
            }),
            Some(kind) if !registry.contains(kind) => errors.push(CompileError {
                kind: CompileErrorKind::InvalidWorker,
                node_id: Some(node.id.clone()),
                edge_id: None,
                field: Some("workerKind".to_string()),
                message: format!("worker kind {kind:?} is not registered"),
            }),
            Some(_) => {}
        }
    }
}

/// Pass 4: edge endpoints exist; mapping targets are declared inputs of the
/// target node; source paths parse.
fn check_edge_mappings(
    graph: &VisualGraph,
    node_ids: &FxHashSet<&str>,
    errors: &mut Vec<CompileError>,
) {
    for edge in &graph.edges {
        let mut endpoints_ok = true;
        for (role, id) in [("source", &edge.source), ("target", &edge.target)] {
            if !node_ids.contains(id.as_str()) {
                endpoints_ok = false;
                errors.push(CompileError {
                    kind: CompileErrorKind::InvalidMapping,
                    node_id: Some(id.clone()),
                    edge_id: Some(edge.id.clone()),
                    field: None,
                    message: format!("edge {:?} references unknown {role} node {id:?}", edge.id),
                });
            }
        }
        if !endpoints_ok {
            continue;
        }
        let target_inputs: Vec<&str> = graph
            .node(&edge.target)
            .map(|n| n.data.inputs.iter().map(|i| i.name.as_str()).collect())
            .unwrap_or_default();
        for (input_name, source_path) in edge.mapping() {
            if !target_inputs.contains(&input_name.as_str()) {
                errors.push(CompileError {
                    kind: CompileErrorKind::InvalidMapping,
                    node_id: Some(edge.target.clone()),
                    edge_id: Some(edge.id.clone()),
                    field: Some(input_name.clone()),
                    message: format!(
                        "mapping targets {input_name:?}, which is not a declared input of {:?}",
                        edge.target
                    ),
                });
            }
            if validate_path(source_path).is_err() {
                errors.push(CompileError {
                    kind: CompileErrorKind::InvalidMapping,
                    node_id: Some(edge.source.clone()),
                    edge_id: Some(edge.id.clone()),
                    field: Some(input_name.clone()),
                    message: format!("mapping source path {source_path:?} cannot be parsed"),
                });
            }
        }
    }
}

/// Pass 5: splitters need >= 2 outgoing journey edges and a reachable
/// collector; collectors need >= 2 inbound journey edges and a reaching
/// splitter. Violations are collected, not fatal individually.
fn check_splitter_collector(
    graph: &VisualGraph,
    adj: &FxHashMap<&str, Vec<&str>>,
    inbound: &FxHashMap<&str, Vec<&str>>,
    errors: &mut Vec<CompileError>,
) {
    let type_of: FxHashMap<&str, NodeType> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), n.node_type))
        .collect();

    let reaches_type = |start: &str, links: &FxHashMap<&str, Vec<&str>>, wanted: NodeType| {
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        let mut frontier: Vec<&str> = links.get(start).cloned().unwrap_or_default();
        while let Some(next) = frontier.pop() {
            if !seen.insert(next) {
                continue;
            }
            if type_of.get(next) == Some(&wanted) {
                return true;
            }
            if let Some(more) = links.get(next) {
                frontier.extend(more);
            }
        }
        false
    };

    for node in &graph.nodes {
        match node.node_type {
            NodeType::Splitter => {
                let out = adj.get(node.id.as_str()).map_or(0, Vec::len);
                if out < 2 {
                    errors.push(CompileError {
                        kind: CompileErrorKind::SplitterCollectorMismatch,
                        node_id: Some(node.id.clone()),
                        edge_id: None,
                        field: None,
                        message: format!(
                            "splitter {:?} has {out} outgoing journey edge(s); needs at least 2",
                            node.id
                        ),
                    });
                }
                if !reaches_type(&node.id, adj, NodeType::Collector) {
                    errors.push(CompileError {
                        kind: CompileErrorKind::SplitterCollectorMismatch,
                        node_id: Some(node.id.clone()),
                        edge_id: None,
                        field: None,
                        message: format!(
                            "splitter {:?} does not reach any collector via journey edges",
                            node.id
                        ),
                    });
                }
            }
            NodeType::Collector => {
                let inb = inbound.get(node.id.as_str()).map_or(0, Vec::len);
                if inb < 2 {
                    errors.push(CompileError {
                        kind: CompileErrorKind::SplitterCollectorMismatch,
                        node_id: Some(node.id.clone()),
                        edge_id: None,
                        field: None,
                        message: format!(
                            "collector {:?} has {inb} inbound journey edge(s); needs at least 2",
                            node.id
                        ),
                    });
                }
                if !reaches_type(&node.id, inbound, NodeType::Splitter) {
                    errors.push(CompileError {
                        kind: CompileErrorKind::SplitterCollectorMismatch,
                        node_id: Some(node.id.clone()),
                        edge_id: None,
                        field: None,
                        message: format!(
                            "collector {:?} is not reachable from any splitter",
                            node.id
                        ),
                    });
                }
            }
            _ => {}
        }
    }
}

/// Pass 6: entity-movement rules must point at existing nodes. The
/// `completeAs`/`setEntityType` vocabularies are enforced by the typed
/// model at the serde boundary.
fn check_entity_movement(
    graph: &VisualGraph,
    node_ids: &FxHashSet<&str>,
    errors: &mut Vec<CompileError>,
) {
    let mut check_rule = |node_id: &str, hook: &str, rule: &MovementRule| {
        if !node_ids.contains(rule.target_section_id.as_str()) {
            errors.push(CompileError {
                kind: CompileErrorKind::InvalidEntityMovement,
                node_id: Some(node_id.to_string()),
                edge_id: None,
                field: Some(hook.to_string()),
                message: format!(
                    "{hook} on node {node_id:?} targets unknown node {:?}",
                    rule.target_section_id
                ),
            });
        }
    };

    for node in &graph.nodes {
        if node.node_type != NodeType::Worker {
            continue;
        }
        if let Some(movement) = &node.data.entity_movement {
            if let Some(rule) = &movement.on_success {
                check_rule(&node.id, "onSuccess", rule);
            }
            if let Some(rule) = &movement.on_failure {
                check_rule(&node.id, "onFailure", rule);
            }
        }
    }
}

/// Compilation pass proper. Runs only on validated input; node ids are
/// carried through byte-for-byte, iteration follows input order.
fn build_execution_graph(graph: &VisualGraph) -> ExecutionGraph {
    let mut oeg = ExecutionGraph::default();

    for node in &graph.nodes {
        oeg.nodes.insert(
            node.id.clone(),
            OegNode {
                id: node.id.clone(),
                node_type: node.node_type,
                worker_kind: node.data.worker_kind.clone(),
                config: node.data.config.clone(),
                inputs: node.data.inputs.clone(),
                outputs: node.data.outputs.clone(),
                entity_movement: node.data.entity_movement.clone(),
            },
        );
        // Ensure every node appears in the indexes even when isolated.
        oeg.adjacency.entry(node.id.clone()).or_default();
        oeg.outbound_edges.entry(node.id.clone()).or_default();
        oeg.inbound_edges.entry(node.id.clone()).or_default();
    }

    for edge in &graph.edges {
        let mapping = edge.mapping().clone();
        oeg.outbound_edges
            .entry(edge.source.clone())
            .or_default()
            .push(OutboundEdge {
                id: edge.id.clone(),
                target: edge.target.clone(),
                edge_type: edge.edge_type,
                mapping: mapping.clone(),
            });
        if edge.edge_type == EdgeType::Journey {
            oeg.adjacency
                .entry(edge.source.clone())
                .or_default()
                .push(edge.target.clone());
            oeg.inbound_edges
                .entry(edge.target.clone())
                .or_default()
                .push(edge.source.clone());
            oeg.edge_data
                .insert(ExecutionGraph::edge_key(&edge.source, &edge.target), mapping);
        }
    }

    for node in &graph.nodes {
        if oeg.inbound_edges.get(&node.id).is_none_or(Vec::is_empty) {
            oeg.entry_nodes.push(node.id.clone());
        }
        if oeg.adjacency.get(&node.id).is_none_or(Vec::is_empty) {
            oeg.terminal_nodes.push(node.id.clone());
        }
    }

    oeg
}
