use serde_json::json;

use super::*;
use crate::types::{EdgeType, NodeType};
use crate::workers::WorkerRegistry;

fn worker(id: &str, inputs: Vec<InputDecl>) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Worker,
        data: NodeData {
            worker_kind: Some("echo".to_string()),
            inputs,
            ..NodeData::default()
        },
    }
}

fn section(id: &str) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Section,
        data: NodeData::default(),
    }
}

fn node_of(id: &str, node_type: NodeType) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type,
        data: NodeData::default(),
    }
}

fn edge(id: &str, source: &str, target: &str) -> VisualEdge {
    VisualEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        edge_type: EdgeType::Journey,
        data: None,
    }
}

fn mapped_edge(id: &str, source: &str, target: &str, pairs: &[(&str, &str)]) -> VisualEdge {
    let mut mapping = std::collections::BTreeMap::new();
    for (k, v) in pairs {
        mapping.insert((*k).to_string(), (*v).to_string());
    }
    VisualEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        edge_type: EdgeType::Journey,
        data: Some(EdgeData { mapping }),
    }
}

fn registry() -> WorkerRegistry {
    WorkerRegistry::with_builtins()
}

#[test]
fn linear_chain_compiles() {
    let graph = VisualGraph {
        nodes: vec![
            section("u"),
            worker("w", vec![InputDecl::required("prompt")]),
            section("t"),
        ],
        edges: vec![
            mapped_edge("e1", "u", "w", &[("prompt", "topic")]),
            edge("e2", "w", "t"),
        ],
    };
    let oeg = compile(&graph, &registry()).unwrap();
    assert_eq!(oeg.entry_nodes, vec!["u".to_string()]);
    assert_eq!(oeg.terminal_nodes, vec!["t".to_string()]);
    assert_eq!(oeg.downstream("u"), &["w".to_string()]);
    assert_eq!(oeg.upstream("t"), &["w".to_string()]);
    assert_eq!(
        oeg.mapping("u", "w").and_then(|m| m.get("prompt")),
        Some(&"topic".to_string())
    );
}

#[test]
fn node_ids_survive_byte_for_byte() {
    let odd_ids = ["node-αβ", "  spaced  ", "UPPER_lower.1234", "节点"];
    let graph = VisualGraph {
        nodes: odd_ids.iter().map(|id| section(id)).collect(),
        edges: vec![],
    };
    let oeg = compile(&graph, &registry()).unwrap();
    for id in odd_ids {
        assert!(oeg.nodes.contains_key(id), "id {id:?} must pass through unchanged");
        assert_eq!(oeg.nodes[id].id, id);
    }
}

#[test]
fn compilation_is_deterministic() {
    let graph = VisualGraph {
        nodes: vec![
            section("a"),
            node_of("s", NodeType::Splitter),
            worker("w1", vec![]),
            worker("w2", vec![]),
            node_of("c", NodeType::Collector),
        ],
        edges: vec![
            edge("e0", "a", "s"),
            edge("e1", "s", "w1"),
            edge("e2", "s", "w2"),
            edge("e3", "w1", "c"),
            edge("e4", "w2", "c"),
        ],
    };
    let first = compile(&graph, &registry()).unwrap();
    let second = compile(&graph, &registry()).unwrap();
    assert_eq!(first, second);
    // Serialized forms match too, which is what version deep-compare sees.
    assert_eq!(
        serde_json::to_value(&first).unwrap(),
        serde_json::to_value(&second).unwrap()
    );
}

#[test]
fn cycle_is_reported_with_ordered_path() {
    let graph = VisualGraph {
        nodes: vec![section("a"), section("b"), section("c")],
        edges: vec![edge("e1", "a", "b"), edge("e2", "b", "c"), edge("e3", "c", "a")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::Cycle));
    let cycle_error = failure
        .errors
        .iter()
        .find(|e| e.kind == CompileErrorKind::Cycle)
        .unwrap();
    assert!(cycle_error.message.contains("->"));
}

#[test]
fn self_edge_is_a_cycle() {
    let graph = VisualGraph {
        nodes: vec![section("a")],
        edges: vec![edge("e1", "a", "a")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::Cycle));
}

#[test]
fn system_edges_do_not_create_cycles() {
    let mut back = edge("e2", "b", "a");
    back.edge_type = EdgeType::System;
    let graph = VisualGraph {
        nodes: vec![section("a"), section("b")],
        edges: vec![edge("e1", "a", "b"), back],
    };
    let oeg = compile(&graph, &registry()).unwrap();
    // The system edge appears in outbound_edges only.
    assert_eq!(oeg.downstream("b"), &[] as &[String]);
    assert_eq!(oeg.outbound("b").len(), 1);
    assert_eq!(oeg.outbound("b")[0].edge_type, EdgeType::System);
}

#[test]
fn required_input_needs_mapping_or_default() {
    let graph = VisualGraph {
        nodes: vec![
            section("u"),
            worker("w", vec![InputDecl::required("prompt")]),
        ],
        // Unmapped edge: implicit satisfaction is rejected.
        edges: vec![edge("e1", "u", "w")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::MissingInput));

    let graph_with_default = VisualGraph {
        nodes: vec![
            section("u"),
            worker(
                "w",
                vec![InputDecl::required("prompt").with_default(json!("fallback"))],
            ),
        ],
        edges: vec![edge("e1", "u", "w")],
    };
    assert!(compile(&graph_with_default, &registry()).is_ok());
}

#[test]
fn unregistered_worker_kind_rejected() {
    let mut node = worker("w", vec![]);
    node.data.worker_kind = Some("no-such-worker".to_string());
    let graph = VisualGraph {
        nodes: vec![node],
        edges: vec![],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::InvalidWorker));
}

#[test]
fn mapping_must_name_declared_inputs_and_parse_paths() {
    let graph = VisualGraph {
        nodes: vec![section("u"), worker("w", vec![InputDecl::optional("known")])],
        edges: vec![mapped_edge("e1", "u", "w", &[("unknown", "x"), ("known", "a..b")])],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    let mapping_errors: Vec<_> = failure
        .errors
        .iter()
        .filter(|e| e.kind == CompileErrorKind::InvalidMapping)
        .collect();
    assert_eq!(mapping_errors.len(), 2);
}

#[test]
fn edge_endpoints_must_exist() {
    let graph = VisualGraph {
        nodes: vec![section("a")],
        edges: vec![edge("e1", "a", "ghost")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::InvalidMapping));
}

#[test]
fn splitter_collector_pairing_is_validated() {
    // Splitter with one outgoing edge and no collector.
    let graph = VisualGraph {
        nodes: vec![node_of("s", NodeType::Splitter), worker("w", vec![])],
        edges: vec![edge("e1", "s", "w")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::SplitterCollectorMismatch));

    // Collector with a single inbound edge and no splitter upstream.
    let graph = VisualGraph {
        nodes: vec![worker("w", vec![]), node_of("c", NodeType::Collector)],
        edges: vec![edge("e1", "w", "c")],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::SplitterCollectorMismatch));

    // Proper pairing passes.
    let graph = VisualGraph {
        nodes: vec![
            node_of("s", NodeType::Splitter),
            worker("w1", vec![]),
            worker("w2", vec![]),
            node_of("c", NodeType::Collector),
        ],
        edges: vec![
            edge("e1", "s", "w1"),
            edge("e2", "s", "w2"),
            edge("e3", "w1", "c"),
            edge("e4", "w2", "c"),
        ],
    };
    assert!(compile(&graph, &registry()).is_ok());
}

#[test]
fn entity_movement_targets_must_exist() {
    let mut node = worker("w", vec![]);
    node.data.entity_movement = Some(EntityMovement {
        on_success: Some(MovementRule {
            target_section_id: "ghost".to_string(),
            complete_as: Some(CompleteAs::Success),
            set_entity_type: None,
        }),
        on_failure: None,
    });
    let graph = VisualGraph {
        nodes: vec![node],
        edges: vec![],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::InvalidEntityMovement));
}

#[test]
fn errors_are_collected_not_fail_fast() {
    let graph = VisualGraph {
        nodes: vec![
            section("a"),
            section("b"),
            worker("w", vec![InputDecl::required("missing")]),
        ],
        edges: vec![
            edge("e1", "a", "b"),
            edge("e2", "b", "a"),          // cycle
            edge("e3", "a", "ghost"),      // unknown endpoint
        ],
    };
    let failure = compile(&graph, &registry()).unwrap_err();
    assert!(failure.has_kind(CompileErrorKind::Cycle));
    assert!(failure.has_kind(CompileErrorKind::MissingInput));
    assert!(failure.has_kind(CompileErrorKind::InvalidMapping));
}

#[test]
fn isolated_nodes_are_entry_and_terminal() {
    let graph = VisualGraph {
        nodes: vec![section("solo")],
        edges: vec![],
    };
    let oeg = compile(&graph, &registry()).unwrap();
    assert_eq!(oeg.entry_nodes, vec!["solo".to_string()]);
    assert_eq!(oeg.terminal_nodes, vec!["solo".to_string()]);
}
