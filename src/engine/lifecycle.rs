//! Run lifecycle: creation, terminal recomputation, retry, cancellation.

use futures_util::future::join_all;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::engine::{Engine, EngineError};
use crate::graphs::ExecutionGraph;
use crate::state::{MergeSource, Run};
use crate::types::{NodeStatus, RunStatus};

impl Engine {
    /// Create a run of `flow_id` against `version_id` and fire its entry
    /// nodes concurrently.
    ///
    /// `initial_inputs` seeds entry-node stored inputs: keyed by entry
    /// node id, or, when the graph has exactly one entry node, the whole
    /// value is that node's input. `entity_id` attaches a business entity
    /// whose movement hooks fire as worker nodes finish.
    #[instrument(skip(self, initial_inputs), err)]
    pub async fn start_run(
        &self,
        flow_id: &str,
        version_id: &str,
        initial_inputs: Option<Value>,
        entity_id: Option<String>,
    ) -> Result<Run, EngineError> {
        let version = self.load_version(version_id).await?;
        if version.flow_id != flow_id {
            return Err(EngineError::VersionFlowMismatch {
                version_id: version_id.to_string(),
                flow_id: flow_id.to_string(),
            });
        }
        let oeg = &version.execution_graph;

        // The only bulk node-states write: the run is not yet visible to
        // any worker or callback.
        let mut run = Run::seeded(flow_id, version_id, oeg);
        run.entity_id = entity_id;
        let run_id = run.id.clone();
        self.store.create_run(run).await?;

        for entry in &oeg.entry_nodes {
            if let Some(seed) = entry_seed(initial_inputs.as_ref(), entry, oeg.entry_nodes.len()) {
                self.store
                    .merge_node_input(&run_id, entry, MergeSource::initial(), seed)
                    .await?;
            }
        }

        info!(%run_id, version_id, entries = oeg.entry_nodes.len(), "run started");
        let firings = oeg
            .entry_nodes
            .iter()
            .map(|entry| self.fire_node(&run_id, entry));
        for result in join_all(firings).await {
            result?;
        }

        self.finalize_if_terminal(&run_id).await?;
        self.load_run(&run_id).await
    }

    /// Recompute the run's terminal status.
    ///
    /// - every terminal node completed -> run completed
    /// - anything running or waiting -> still running
    /// - a failure with no node able to make progress -> run failed
    #[instrument(skip(self), err)]
    pub async fn finalize_if_terminal(&self, run_id: &str) -> Result<(), EngineError> {
        let run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            return Ok(());
        }
        let version = self.load_version(&run.version_id).await?;
        let oeg = &version.execution_graph;

        let status_of = |id: &str| run.node_state(id).map(|s| s.status);

        let all_terminals_done = oeg
            .terminal_nodes
            .iter()
            .all(|id| status_of(id) == Some(NodeStatus::Completed));
        if all_terminals_done {
            self.store.set_run_status(run_id, RunStatus::Completed).await?;
            info!(run_id, "run completed");
            return Ok(());
        }

        let any_in_flight = run.node_states.values().any(|s| {
            matches!(s.status, NodeStatus::Running | NodeStatus::WaitingForUser)
        });
        if any_in_flight {
            return Ok(());
        }

        let any_failed = run
            .node_states
            .values()
            .any(|s| s.status == NodeStatus::Failed);
        if any_failed && !pending_progress_possible(&run, oeg) {
            self.store.set_run_status(run_id, RunStatus::Failed).await?;
            info!(run_id, "run failed");
        }
        Ok(())
    }

    /// Retry a failed node: `failed -> pending`, then re-fire if its
    /// journey upstreams are (still) all completed.
    #[instrument(skip(self), err)]
    pub async fn retry_node(&self, run_id: &str, node_id: &str) -> Result<(), EngineError> {
        let run = self.load_run(run_id).await?;
        let version = self.load_version(&run.version_id).await?;
        let oeg = &version.execution_graph;
        if oeg.node(node_id).is_none() {
            return Err(EngineError::NodeNotFound {
                run_id: run_id.to_string(),
                node_id: node_id.to_string(),
            });
        }

        let cas = self
            .cas_node(run_id, node_id, &[NodeStatus::Failed], NodeStatus::Pending, None, None)
            .await?;
        if !cas.applied {
            return Err(EngineError::StatusTransition {
                node_id: node_id.to_string(),
                from: cas.current.status,
                to: NodeStatus::Pending,
            });
        }

        // A failed run becomes live again the moment a retry is accepted.
        if self.load_run(run_id).await?.status == RunStatus::Failed {
            self.store.set_run_status(run_id, RunStatus::Running).await?;
        }

        if self.upstreams_completed(run_id, node_id, oeg).await? {
            self.fire_node(run_id, node_id).await?;
        } else {
            debug!(run_id, node_id, "retry accepted; waiting on upstreams");
        }
        self.finalize_if_terminal(run_id).await
    }

    /// Mark a run cancelled. Subsequent `fire_node` calls no-op; late
    /// worker callbacks are absorbed idempotently.
    #[instrument(skip(self), err)]
    pub async fn cancel_run(&self, run_id: &str) -> Result<(), EngineError> {
        let run = self.load_run(run_id).await?;
        if !run.status.is_terminal() {
            self.store.set_run_status(run_id, RunStatus::Cancelled).await?;
            info!(run_id, "run cancelled");
        }
        Ok(())
    }

    /// Complete a UX node with externally supplied output.
    ///
    /// Replays against an already-completed node are no-ops; completing a
    /// node that never suspended is a transition error.
    #[instrument(skip(self, output), err)]
    pub async fn complete_ux(
        &self,
        run_id: &str,
        node_id: &str,
        output: Value,
    ) -> Result<(), EngineError> {
        let cas = self
            .complete_node(
                run_id,
                node_id,
                output,
                &[NodeStatus::WaitingForUser, NodeStatus::Running],
            )
            .await?;
        if !cas.applied && cas.current.status != NodeStatus::Completed {
            return Err(EngineError::StatusTransition {
                node_id: node_id.to_string(),
                from: cas.current.status,
                to: NodeStatus::Completed,
            });
        }
        Ok(())
    }

    /// Handle a worker callback: validate the node is running, merge the
    /// stored input with the callback output, and resume the walk.
    #[instrument(skip(self, output, error), err)]
    pub async fn handle_callback(
        &self,
        run_id: &str,
        node_id: &str,
        completed: bool,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        if completed {
            let run = self.load_run(run_id).await?;
            let stored_input = run
                .node_state(node_id)
                .and_then(|s| s.input.clone())
                .unwrap_or(Value::Null);
            let merged = crate::utils::json_ext::merge_io(
                stored_input,
                output.unwrap_or(Value::Null),
            );
            // Duplicate or late callbacks (node already completed or timed
            // out) come back unapplied and are absorbed silently.
            self.complete_node(run_id, node_id, merged, &[NodeStatus::Running])
                .await
                .map(|_| ())
        } else {
            self.fail_node(
                run_id,
                node_id,
                error.unwrap_or_else(|| "worker reported failure".to_string()),
            )
            .await
        }
    }
}

/// Pick the seed input for one entry node.
fn entry_seed(initial: Option<&Value>, entry_id: &str, entry_count: usize) -> Option<Value> {
    let initial = initial?;
    if let Some(keyed) = initial.get(entry_id) {
        return Some(keyed.clone());
    }
    // A sole entry node takes the whole record.
    (entry_count == 1).then(|| initial.clone())
}

/// Whether any pending node could still complete: true when all of its
/// transitive journey upstreams avoid `failed`. The journey subgraph is
/// acyclic, so a memoized DFS terminates.
fn pending_progress_possible(run: &Run, oeg: &ExecutionGraph) -> bool {
    fn can_complete<'a>(
        id: &'a str,
        run: &'a Run,
        oeg: &'a ExecutionGraph,
        memo: &mut FxHashMap<&'a str, bool>,
    ) -> bool {
        if let Some(&cached) = memo.get(id) {
            return cached;
        }
        let verdict = match run.node_state(id).map(|s| s.status) {
            Some(NodeStatus::Completed) => true,
            Some(NodeStatus::Running) | Some(NodeStatus::WaitingForUser) => true,
            Some(NodeStatus::Failed) | None => false,
            Some(NodeStatus::Pending) => oeg
                .upstream(id)
                .iter()
                .all(|up| can_complete(up, run, oeg, memo)),
        };
        memo.insert(id, verdict);
        verdict
    }

    let mut memo = FxHashMap::default();
    run.node_states
        .iter()
        .filter(|(_, s)| s.status == NodeStatus::Pending)
        .any(|(id, _)| can_complete(id, run, oeg, &mut memo))
}
