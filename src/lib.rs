//! # Flowrun: Versioned Workflow-Graph Execution Engine
//!
//! Flowrun runs directed acyclic graphs of compute nodes (workers,
//! user-interaction gates, fan-out splitters, fan-in collectors) on behalf
//! of business processes. Graphs are versioned; every run references an
//! immutable snapshot; execution walks edges as nodes complete, with all
//! coordination flowing through the store's atomic primitives so the
//! engine itself stays stateless.
//!
//! ## Core Concepts
//!
//! - **Visual graph**: the editor-facing form, compiled per version
//! - **Execution graph**: the stripped, indexed runtime form
//! - **Edge walking**: node completion propagates outputs along journey
//!   edges and fires targets whose upstreams are all complete
//! - **Fan-out / fan-in**: splitters seed one branch per target; collectors
//!   aggregate arrivals atomically and fire exactly once
//! - **Webhooks**: signed inbound deliveries create entities and runs
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use flowrun::config::EngineConfig;
//! use flowrun::graphs::{InputDecl, NodeData, VisualEdge, VisualGraph, VisualNode};
//! use flowrun::state::Flow;
//! use flowrun::store::{MemoryStore, Store};
//! use flowrun::types::NodeType;
//! use flowrun::versions::VersionManager;
//! use flowrun::workers::WorkerRegistry;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
//! let registry = Arc::new(WorkerRegistry::with_builtins());
//! let config = Arc::new(EngineConfig::default());
//!
//! let flow = Flow::new("greeter");
//! store.create_flow(flow.clone()).await?;
//!
//! let graph = VisualGraph {
//!     nodes: vec![VisualNode {
//!         id: "hello".into(),
//!         node_type: NodeType::Worker,
//!         data: NodeData {
//!             worker_kind: Some("echo".into()),
//!             inputs: vec![InputDecl::optional("prompt")],
//!             ..NodeData::default()
//!         },
//!     }],
//!     edges: vec![],
//! };
//!
//! let versions = VersionManager::new(Arc::clone(&store), Arc::clone(&registry));
//! let (version_id, _oeg) = versions.create_version(&flow.id, graph, None).await?;
//!
//! let engine = flowrun::engine::Engine::new(store, registry, config, "http://localhost:8080");
//! let run = engine
//!     .start_run(&flow.id, &version_id, Some(serde_json::json!({"prompt": "hi"})), None)
//!     .await?;
//! println!("run {} finished as {}", run.id, run.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Guide
//!
//! - [`graphs`] - visual/execution graph models and the compiler
//! - [`versions`] - immutable version snapshots and auto-versioning
//! - [`engine`] - edge-walking execution, fan-out/fan-in, lifecycle
//! - [`store`] - the atomic persistence interface and its backends
//! - [`workers`] - worker trait, registry, dispatch, mock fallback
//! - [`webhooks`] - signed ingestion pipeline feeding the engine
//! - [`api`] - axum HTTP surface (runs, callbacks, webhooks)
//! - [`entities`] - business subjects traveling the graph
//! - [`config`] / [`telemetry`] - environment configuration and tracing

pub mod api;
pub mod config;
pub mod engine;
pub mod entities;
pub mod graphs;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod utils;
pub mod versions;
pub mod webhooks;
pub mod workers;
