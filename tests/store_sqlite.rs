//! SQLite store: the same contract the memory store honors, durably.

#![cfg(feature = "sqlite")]

use serde_json::json;

use flowrun::graphs::compile;
use flowrun::state::{Flow, MergeSource, Run, Version};
use flowrun::store::{SqliteStore, Store, StoreError};
use flowrun::types::{NodeStatus, RunStatus};
use flowrun::workers::WorkerRegistry;

mod common;
use common::*;

async fn sqlite_store() -> SqliteStore {
    SqliteStore::connect("sqlite::memory:").await.unwrap()
}

async fn seeded_run(store: &SqliteStore) -> Run {
    let registry = WorkerRegistry::with_builtins();
    let oeg = compile(&linear_graph(), &registry).unwrap();

    let flow = Flow::new("sqlite-flow");
    store.create_flow(flow.clone()).await.unwrap();
    let version = Version {
        id: "v1".to_string(),
        flow_id: flow.id.clone(),
        visual_graph: linear_graph(),
        execution_graph: oeg.clone(),
        commit_message: Some("init".to_string()),
        created_at: chrono::Utc::now(),
    };
    store.insert_version(version).await.unwrap();
    store
        .update_flow_current_version(&flow.id, "v1")
        .await
        .unwrap();

    let run = Run::seeded(&flow.id, "v1", &oeg);
    store.create_run(run.clone()).await.unwrap();
    run
}

#[tokio::test]
async fn flow_version_run_round_trip() {
    let store = sqlite_store().await;
    let run = seeded_run(&store).await;

    let flow = store.get_flow(&run.flow_id).await.unwrap().unwrap();
    assert_eq!(flow.current_version_id.as_deref(), Some("v1"));

    let version = store.get_version("v1").await.unwrap().unwrap();
    assert_eq!(version.flow_id, run.flow_id);
    assert_eq!(version.visual_graph, linear_graph());

    let loaded = store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(loaded.node_states.len(), 3);
    assert_eq!(loaded.status, RunStatus::Running);

    let metas = store.list_version_metadata(&run.flow_id).await.unwrap();
    assert_eq!(metas.len(), 1);
    assert_eq!(metas[0].commit_message.as_deref(), Some("init"));
}

#[tokio::test]
async fn cas_and_collector_primitives_match_memory_semantics() {
    let store = sqlite_store().await;
    let run = seeded_run(&store).await;

    let outcome = store
        .update_node_state(&run.id, "u", &[NodeStatus::Pending], NodeStatus::Running, None, None)
        .await
        .unwrap();
    assert!(outcome.applied);

    // Second dispatch loses the race.
    let outcome = store
        .update_node_state(&run.id, "u", &[NodeStatus::Pending], NodeStatus::Running, None, None)
        .await
        .unwrap();
    assert!(!outcome.applied);
    assert_eq!(outcome.current.status, NodeStatus::Running);

    // FSM violations are rejected inside the store.
    let err = store
        .update_node_state(&run.id, "w", &[NodeStatus::Pending], NodeStatus::Completed, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::InvalidTransition { .. }));

    // Input merge accumulates across writes.
    store
        .merge_node_input(&run.id, "w", MergeSource::new("u1", "e1"), json!({"a": 1}))
        .await
        .unwrap();
    let merged = store
        .merge_node_input(&run.id, "w", MergeSource::new("u2", "e2"), json!({"b": 2}))
        .await
        .unwrap();
    assert_eq!(merged, json!({"a": 1, "b": 2}));

    // Colliding keys resolve by source order, not arrival order: the
    // later source landed first, so the earlier one's write loses.
    store
        .merge_node_input(
            &run.id,
            "w",
            MergeSource::new("zeta", "e9"),
            json!({"shared": "from-zeta"}),
        )
        .await
        .unwrap();
    let merged = store
        .merge_node_input(
            &run.id,
            "w",
            MergeSource::new("alpha", "e0"),
            json!({"shared": "from-alpha"}),
        )
        .await
        .unwrap();
    assert_eq!(merged["shared"], json!("from-zeta"));

    // Collector appends deduplicate by upstream.
    let t = store
        .append_collector_arrival(&run.id, "t", "w", json!("x"), 2)
        .await
        .unwrap();
    assert_eq!(t.arrived.len(), 1);
    let t = store
        .append_collector_arrival(&run.id, "t", "w", json!("x-dup"), 2)
        .await
        .unwrap();
    assert_eq!(t.received.len(), 1);
}

#[tokio::test]
async fn webhook_tables_round_trip() {
    let store = sqlite_store().await;
    let run = seeded_run(&store).await;

    store
        .put_webhook_config(flowrun::webhooks::WebhookConfig {
            slug: "hook".to_string(),
            flow_id: run.flow_id.clone(),
            secret: Some("secret".to_string()),
            source: flowrun::webhooks::WebhookSource::Stripe,
            require_signature: true,
            active: true,
        })
        .await
        .unwrap();
    let config = store.get_webhook_config("hook").await.unwrap().unwrap();
    assert_eq!(config.source, flowrun::webhooks::WebhookSource::Stripe);
    assert!(config.require_signature);

    assert!(!store.webhook_event_processed("hook", "evt_1").await.unwrap());
    assert!(store.webhook_event_processed("hook", "evt_1").await.unwrap());

    store
        .append_webhook_event(flowrun::webhooks::WebhookEvent::new("hook", "accepted"))
        .await
        .unwrap();
}

#[tokio::test]
async fn file_backed_store_survives_reconnection() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", dir.path().join("flowrun.db").display());

    let run_id = {
        let store = SqliteStore::connect(&url).await.unwrap();
        let run = seeded_run(&store).await;
        store
            .update_node_state(&run.id, "u", &[NodeStatus::Pending], NodeStatus::Running, None, None)
            .await
            .unwrap();
        run.id
    };

    // A fresh connection (fresh process, conceptually) sees the same state.
    let store = SqliteStore::connect(&url).await.unwrap();
    let run = store.get_run(&run_id).await.unwrap().unwrap();
    assert_eq!(run.node_state("u").unwrap().status, NodeStatus::Running);
    assert_eq!(run.node_state("w").unwrap().status, NodeStatus::Pending);
}

#[tokio::test]
async fn entities_round_trip_with_position() {
    let store = sqlite_store().await;
    let run = seeded_run(&store).await;

    let mut entity =
        flowrun::entities::Entity::new(&run.flow_id, Some("a@b.co".to_string()), json!({"k": 1}));
    entity.travel("e1", "w", 0.25);
    store.upsert_entity(entity.clone()).await.unwrap();

    let loaded = store.get_entity(&entity.id).await.unwrap().unwrap();
    assert_eq!(loaded.current_edge_id.as_deref(), Some("e1"));
    assert_eq!(loaded.edge_progress, Some(0.25));
    assert_eq!(loaded.destination_node_id.as_deref(), Some("w"));

    let by_email = store
        .find_entity_by_email(&run.flow_id, "a@b.co")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_email.id, entity.id);
}
