#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use flowrun::config::EngineConfig;
use flowrun::engine::Engine;
use flowrun::graphs::{EdgeData, InputDecl, NodeData, VisualEdge, VisualGraph, VisualNode};
use flowrun::state::Flow;
use flowrun::store::{MemoryStore, Store};
use flowrun::types::{EdgeType, NodeType};
use flowrun::versions::VersionManager;
use flowrun::webhooks::WebhookIngress;
use flowrun::workers::WorkerRegistry;

use super::workers::{AsyncNoopWorker, CountingWorker, SuffixWorker};

/// Everything a test needs, wired over one in-memory store.
pub struct TestHarness {
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
    pub versions: VersionManager,
    pub ingress: WebhookIngress,
    pub config: Arc<EngineConfig>,
}

pub fn harness() -> TestHarness {
    harness_with(EngineConfig::default(), |_| {})
}

pub fn harness_with(
    config: EngineConfig,
    customize: impl FnOnce(&mut WorkerRegistry),
) -> TestHarness {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();

    let mut registry = WorkerRegistry::with_builtins();
    registry.register(SuffixWorker);
    registry.register(AsyncNoopWorker);
    registry.register(CountingWorker::new());
    customize(&mut registry);
    let registry = Arc::new(registry);
    let config = Arc::new(config);

    let engine = Engine::new(
        Arc::clone(&store_dyn),
        Arc::clone(&registry),
        Arc::clone(&config),
        "http://localhost:8080",
    );
    let versions = VersionManager::new(Arc::clone(&store_dyn), registry);
    let ingress = WebhookIngress::new(store_dyn, engine.clone(), Arc::clone(&config));

    TestHarness {
        store,
        engine,
        versions,
        ingress,
        config,
    }
}

/// Create a flow and a version compiled from `graph`; returns their ids.
pub async fn flow_with_version(harness: &TestHarness, graph: VisualGraph) -> (String, String) {
    let flow = Flow::new("test-flow");
    let flow_id = flow.id.clone();
    harness.store.create_flow(flow).await.unwrap();
    let (version_id, _) = harness
        .versions
        .create_version(&flow_id, graph, None)
        .await
        .unwrap();
    (flow_id, version_id)
}

// --- graph builders -------------------------------------------------------

pub fn section(id: &str) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Section,
        data: NodeData::default(),
    }
}

pub fn ux(id: &str) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Ux,
        data: NodeData::default(),
    }
}

pub fn worker(id: &str, kind: &str, inputs: Vec<InputDecl>) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Worker,
        data: NodeData {
            worker_kind: Some(kind.to_string()),
            inputs,
            ..NodeData::default()
        },
    }
}

pub fn worker_with_config(
    id: &str,
    kind: &str,
    config: serde_json::Value,
) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Worker,
        data: NodeData {
            worker_kind: Some(kind.to_string()),
            config,
            ..NodeData::default()
        },
    }
}

pub fn splitter(id: &str, config: serde_json::Value) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Splitter,
        data: NodeData {
            config,
            ..NodeData::default()
        },
    }
}

pub fn collector(id: &str, config: serde_json::Value) -> VisualNode {
    VisualNode {
        id: id.to_string(),
        node_type: NodeType::Collector,
        data: NodeData {
            config,
            ..NodeData::default()
        },
    }
}

pub fn edge(id: &str, source: &str, target: &str) -> VisualEdge {
    VisualEdge {
        id: id.to_string(),
        source: source.to_string(),
        target: target.to_string(),
        edge_type: EdgeType::Journey,
        data: None,
    }
}

pub fn mapped_edge(id: &str, source: &str, target: &str, pairs: &[(&str, &str)]) -> VisualEdge {
    let mut mapping = BTreeMap::new();
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

/// Scenario graph: `u -[prompt<-topic]-> w(echo) -> t`.
pub fn linear_graph() -> VisualGraph {
    VisualGraph {
        nodes: vec![
            section("u"),
            worker("w", "echo", vec![InputDecl::required("prompt")]),
            section("t"),
        ],
        edges: vec![
            mapped_edge("e1", "u", "w", &[("prompt", "topic")]),
            edge("e2", "w", "t"),
        ],
    }
}

/// Scenario graph: splitter over ["a","b","c"] -> three suffix workers ->
/// collector -> terminal.
pub fn fanout_graph() -> VisualGraph {
    VisualGraph {
        nodes: vec![
            splitter("s", serde_json::json!({"branches": ["a", "b", "c"]})),
            worker("w1", "suffix", vec![]),
            worker("w2", "suffix", vec![]),
            worker("w3", "suffix", vec![]),
            collector("c", serde_json::Value::Null),
            section("t"),
        ],
        edges: vec![
            edge("e1", "s", "w1"),
            edge("e2", "s", "w2"),
            edge("e3", "s", "w3"),
            edge("e4", "w1", "c"),
            edge("e5", "w2", "c"),
            edge("e6", "w3", "c"),
            edge("e7", "c", "t"),
        ],
    }
}

/// Scenario graph: `u -> {w1(flaky), w2(echo)} -> j -> t` where `j` is a
/// plain join section gated on both workers.
pub fn join_graph() -> VisualGraph {
    VisualGraph {
        nodes: vec![
            section("u"),
            worker("w1", "flaky", vec![]),
            worker("w2", "echo", vec![]),
            section("j"),
            section("t"),
        ],
        edges: vec![
            edge("e1", "u", "w1"),
            edge("e2", "u", "w2"),
            edge("e3", "w1", "j"),
            edge("e4", "w2", "j"),
            edge("e5", "j", "t"),
        ],
    }
}
