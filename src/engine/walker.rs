//! Node firing and downstream propagation.
//!
//! `fire_node` is the single entry point for making a node run. Every
//! status move is a store CAS, so duplicate firings, late callbacks, and
//! concurrent engines all collapse into idempotent no-ops.

use futures_util::future::BoxFuture;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::engine::{resolve_mapping, Engine, EngineError};
use crate::graphs::ExecutionGraph;
use crate::state::MergeSource;
use crate::store::CasOutcome;
use crate::types::{EdgeType, NodeStatus, NodeType};
use crate::workers::DispatchOutcome;

impl Engine {
    /// Fire a node: `pending -> running`, then act per node type.
    ///
    /// Returns idempotently when the node is not pending (another engine
    /// or callback got there first) or when the run is terminal/cancelled.
    /// Boxed because execution recurses through downstream walks.
    pub fn fire_node<'a>(
        &'a self,
        run_id: &'a str,
        node_id: &'a str,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        Box::pin(async move {
            let run = self.load_run(run_id).await?;
            if run.status.is_terminal() {
                debug!(run_id, node_id, status = %run.status, "run terminal; not firing");
                return Ok(());
            }
            let version = self.load_version(&run.version_id).await?;
            let oeg = &version.execution_graph;
            let node = oeg.node(node_id).ok_or_else(|| EngineError::NodeNotFound {
                run_id: run_id.to_string(),
                node_id: node_id.to_string(),
            })?;

            let cas = self
                .cas_node(
                    run_id,
                    node_id,
                    &[NodeStatus::Pending],
                    NodeStatus::Running,
                    None,
                    None,
                )
                .await?;
            if !cas.applied {
                debug!(run_id, node_id, current = %cas.current.status, "already dispatched");
                return Ok(());
            }
            let input = cas.current.input.clone().unwrap_or(Value::Null);

            match node.node_type {
                NodeType::Worker => self.dispatch_worker(run_id, node_id, input, oeg).await,
                NodeType::Ux => {
                    // Suspend until the external completion endpoint fires.
                    self.cas_node(
                        run_id,
                        node_id,
                        &[NodeStatus::Running],
                        NodeStatus::WaitingForUser,
                        None,
                        None,
                    )
                    .await?;
                    Ok(())
                }
                NodeType::Section => {
                    // Pass-through: the stored input is the output.
                    self.complete_node(run_id, node_id, input, &[NodeStatus::Running])
                        .await
                        .map(|_| ())
                }
                NodeType::Splitter => self.fire_splitter(run_id, node_id, input, oeg).await,
                NodeType::Collector => {
                    self.fire_collector(run_id, node_id, &cas.current, oeg).await
                }
            }
        })
    }

    /// Dispatch a worker node and fold the outcome into node state.
    async fn dispatch_worker(
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
        let kind = node.worker_kind.clone().unwrap_or_default();
        let outcome = self
            .dispatcher
            .dispatch(
                run_id,
                node_id,
                &kind,
                input,
                node.config.clone(),
                self.callback_url(run_id, node_id),
            )
            .await;

        match outcome {
            DispatchOutcome::Completed(output) => self
                .complete_node(run_id, node_id, output, &[NodeStatus::Running])
                .await
                .map(|_| ()),
            DispatchOutcome::Failed(message) => self.fail_node(run_id, node_id, message).await,
            DispatchOutcome::AsyncPending => {
                self.spawn_timeout_watchdog(run_id, node_id, &kind);
                Ok(())
            }
        }
    }

    /// Watchdog for async workers: when the callback misses its window,
    /// CAS the node `running -> failed`. A callback that already landed
    /// makes the CAS a no-op.
    fn spawn_timeout_watchdog(&self, run_id: &str, node_id: &str, worker_kind: &str) {
        let engine = self.clone();
        let run_id = run_id.to_string();
        let node_id = node_id.to_string();
        let kind = worker_kind.to_string();
        let timeout = self.dispatcher.timeout_for(worker_kind);
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let message = format!(
                "worker {kind:?} timed out after {}s waiting for callback",
                timeout.as_secs()
            );
            if let Err(err) = engine.fail_node(&run_id, &node_id, message).await {
                warn!(%run_id, %node_id, %err, "timeout watchdog failed to record");
            }
        });
    }

    /// Transition to completed (from one of `expected_from`), store the
    /// output, and walk journey edges onward.
    ///
    /// A CAS miss means a duplicate delivery for an already-terminal node:
    /// state is left untouched and downstream edges are not re-walked.
    #[instrument(skip(self, output), err)]
    pub(crate) async fn complete_node(
        &self,
        run_id: &str,
        node_id: &str,
        output: Value,
        expected_from: &[NodeStatus],
    ) -> Result<CasOutcome, EngineError> {
        let cas = self
            .cas_node(
                run_id,
                node_id,
                expected_from,
                NodeStatus::Completed,
                Some(output.clone()),
                None,
            )
            .await?;
        if !cas.applied {
            debug!(run_id, node_id, current = %cas.current.status, "duplicate completion absorbed");
            return Ok(cas);
        }
        self.apply_entity_movement(run_id, node_id, true).await?;
        self.walk_downstream(run_id, node_id, &output).await?;
        self.finalize_if_terminal(run_id).await?;
        Ok(cas)
    }

    /// Transition to failed and record the error. Downstream journey
    /// edges are not fired; sibling branches keep running.
    #[instrument(skip(self), err)]
    pub(crate) async fn fail_node(
        &self,
        run_id: &str,
        node_id: &str,
        error: String,
    ) -> Result<(), EngineError> {
        let cas = self
            .cas_node(
                run_id,
                node_id,
                &[NodeStatus::Running],
                NodeStatus::Failed,
                None,
                Some(error),
            )
            .await?;
        if !cas.applied {
            debug!(run_id, node_id, current = %cas.current.status, "late failure absorbed");
            return Ok(());
        }
        self.apply_entity_movement(run_id, node_id, false).await?;
        self.finalize_if_terminal(run_id).await
    }

    /// Propagate an output along every outbound edge of `source_id`.
    ///
    /// Journey targets receive their mapped input patch and fire when all
    /// of their journey upstreams are completed; collector targets record
    /// an arrival instead. System edges fire their target once without
    /// touching readiness.
    pub(crate) async fn walk_downstream(
        &self,
        run_id: &str,
        source_id: &str,
        output: &Value,
    ) -> Result<(), EngineError> {
        let run = self.load_run(run_id).await?;
        if run.status.is_terminal() {
            // Late completion on a cancelled run: state recorded, walk stops.
            return Ok(());
        }
        let version = self.load_version(&run.version_id).await?;
        let oeg = &version.execution_graph;

        for edge in oeg.outbound(source_id) {
            match edge.edge_type {
                EdgeType::System => {
                    // Collectors are arrival-driven; a system edge cannot
                    // force one to fire early.
                    if oeg.node(&edge.target).map(|n| n.node_type) == Some(NodeType::Collector) {
                        debug!(run_id, target = %edge.target, "system edge to collector ignored");
                        continue;
                    }
                    self.fire_node(run_id, &edge.target).await?;
                }
                EdgeType::Journey => {
                    let patch = resolve_mapping(&edge.mapping, output);
                    let target_type = oeg.node(&edge.target).map(|n| n.node_type);
                    if target_type == Some(NodeType::Collector) {
                        self.record_collector_arrival(run_id, source_id, &edge.target, patch, oeg)
                            .await?;
                    } else {
                        self.store
                            .merge_node_input(
                                run_id,
                                &edge.target,
                                MergeSource::new(source_id, edge.id.as_str()),
                                patch,
                            )
                            .await?;
                        if self.upstreams_completed(run_id, &edge.target, oeg).await? {
                            self.fire_node(run_id, &edge.target).await?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether every journey upstream of `node_id` is completed (trivially
    /// true for entry nodes).
    pub(crate) async fn upstreams_completed(
        &self,
        run_id: &str,
        node_id: &str,
        oeg: &ExecutionGraph,
    ) -> Result<bool, EngineError> {
        let run = self.load_run(run_id).await?;
        Ok(oeg.upstream(node_id).iter().all(|up| {
            run.node_state(up)
                .is_some_and(|s| s.status == NodeStatus::Completed)
        }))
    }

    /// Apply the node's entity-movement hook, when the run carries an
    /// entity and the node declares one.
    pub(crate) async fn apply_entity_movement(
        &self,
        run_id: &str,
        node_id: &str,
        success: bool,
    ) -> Result<(), EngineError> {
        let run = self.load_run(run_id).await?;
        let Some(entity_id) = run.entity_id.as_deref() else {
            return Ok(());
        };
        let version = self.load_version(&run.version_id).await?;
        let Some(node) = version.execution_graph.node(node_id) else {
            return Ok(());
        };
        let Some(movement) = &node.entity_movement else {
            return Ok(());
        };
        let rule = if success {
            movement.on_success.as_ref()
        } else {
            movement.on_failure.as_ref()
        };
        let Some(rule) = rule else { return Ok(()) };

        if let Some(mut entity) = self.store.get_entity(entity_id).await? {
            entity.arrive_at(&rule.target_section_id);
            if let Some(kind) = rule.set_entity_type {
                entity.entity_kind = Some(kind);
            }
            debug!(run_id, node_id, entity_id, target = %rule.target_section_id, "entity moved");
            self.store.upsert_entity(entity).await?;
        }
        Ok(())
    }
}
