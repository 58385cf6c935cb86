//! Async worker dispatch, callbacks, idempotent replay, timeouts.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use flowrun::config::EngineConfig;
use flowrun::store::Store;
use flowrun::types::{NodeStatus, RunStatus};

mod common;
use common::*;

fn async_chain() -> flowrun::graphs::VisualGraph {
    flowrun::graphs::VisualGraph {
        nodes: vec![
            worker("a", "async-noop", vec![]),
            worker("b", "counting", vec![]),
        ],
        edges: vec![edge("e1", "a", "b")],
    }
}

#[tokio::test]
async fn duplicate_callbacks_apply_once_and_fire_downstream_once() {
    let counting = CountingWorker::new();
    let invocations = counting.invocations.clone();
    let h = harness_with(EngineConfig::default(), |registry| {
        registry.register(counting);
    });
    let (flow_id, version_id) = flow_with_version(&h, async_chain()).await;

    let run = h
        .engine
        .start_run(&flow_id, &version_id, None, None)
        .await
        .unwrap();
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.node_state("a").unwrap().status, NodeStatus::Running);

    // The worker posts its result twice (at-least-once delivery).
    h.engine
        .handle_callback(&run.id, "a", true, Some(json!({"x": 1})), None)
        .await
        .unwrap();
    h.engine
        .handle_callback(&run.id, "a", true, Some(json!({"x": 1})), None)
        .await
        .unwrap();

    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.node_state("a").unwrap().output, Some(json!({"x": 1})));
    assert_eq!(invocations.load(Ordering::SeqCst), 1, "downstream fired once");
    // Terminal output is stable across the replay.
    assert_eq!(
        run.node_state("b").unwrap().output,
        Some(json!({"invocations": 1, "input": {"x": 1}}))
    );
}

#[tokio::test]
async fn failed_callback_fails_the_node() {
    let h = harness();
    let (flow_id, version_id) = flow_with_version(&h, async_chain()).await;
    let run = h
        .engine
        .start_run(&flow_id, &version_id, None, None)
        .await
        .unwrap();

    h.engine
        .handle_callback(&run.id, "a", false, None, Some("remote exploded".to_string()))
        .await
        .unwrap();

    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let state = run.node_state("a").unwrap();
    assert_eq!(state.status, NodeStatus::Failed);
    assert_eq!(state.error.as_deref(), Some("remote exploded"));
}

#[tokio::test]
async fn callback_merges_stored_input_with_payload_output() {
    let h = harness();
    let graph = flowrun::graphs::VisualGraph {
        nodes: vec![section("seed"), worker("a", "async-noop", vec![])],
        edges: vec![edge("e1", "seed", "a")],
    };
    let (flow_id, version_id) = flow_with_version(&h, graph).await;
    let run = h
        .engine
        .start_run(&flow_id, &version_id, Some(json!({"kept": true})), None)
        .await
        .unwrap();

    h.engine
        .handle_callback(&run.id, "a", true, Some(json!({"added": 1})), None)
        .await
        .unwrap();

    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(
        run.node_state("a").unwrap().output,
        Some(json!({"kept": true, "added": 1}))
    );
}

#[tokio::test]
async fn missing_callback_times_out_and_fails_the_node() {
    let config =
        EngineConfig::default().with_worker_timeout("async-noop", Duration::from_millis(50));
    let h = harness_with(config, |_| {});
    let (flow_id, version_id) = flow_with_version(&h, async_chain()).await;

    let run = h
        .engine
        .start_run(&flow_id, &version_id, None, None)
        .await
        .unwrap();
    assert_eq!(run.node_state("a").unwrap().status, NodeStatus::Running);

    tokio::time::sleep(Duration::from_millis(200)).await;

    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    let state = run.node_state("a").unwrap();
    assert_eq!(state.status, NodeStatus::Failed);
    assert!(state.error.as_ref().unwrap().contains("timed out"));

    // A callback arriving after the timeout is absorbed, not applied.
    h.engine
        .handle_callback(&run.id, "a", true, Some(json!({"late": true})), None)
        .await
        .unwrap();
    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.node_state("a").unwrap().status, NodeStatus::Failed);
}

#[tokio::test]
async fn http_worker_posts_input_and_callback_url() {
    let server = httpmock::MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(httpmock::Method::POST).path("/work");
            then.status(200).json_body(json!({"accepted": true}));
        })
        .await;

    let h = harness();
    let graph = flowrun::graphs::VisualGraph {
        nodes: vec![worker_with_config(
            "a",
            "http",
            json!({"url": server.url("/work")}),
        )],
        edges: vec![],
    };
    let (flow_id, version_id) = flow_with_version(&h, graph).await;
    let run = h
        .engine
        .start_run(&flow_id, &version_id, Some(json!({"job": 7})), None)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(run.node_state("a").unwrap().status, NodeStatus::Running);

    // The remote reports back through the callback path.
    h.engine
        .handle_callback(&run.id, "a", true, Some(json!({"result": "ok"})), None)
        .await
        .unwrap();
    let run = h.store.get_run(&run.id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);
}
