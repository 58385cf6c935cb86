//! SQLite store.
//!
//! Durable [`Store`] implementation over `sqlx`. Run node-states live in a
//! JSON column; the atomic primitives load, mutate, and write back inside
//! a transaction. The pool is capped at a single connection, which
//! serializes the three node-state primitives with respect to each other
//! exactly as the trait requires (SQLite is single-writer regardless; the
//! cap also removes reader/writer interleaving between the read and the
//! write of one primitive).
//!
//! With the `sqlite-migrations` feature (default), embedded migrations
//! from `./migrations` run on connect; without it, schema management is
//! external.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::entities::Entity;
use crate::state::{
    CollectorArrival, CollectorTracking, Flow, MergeSource, NodeState, Run, Version, VersionMeta,
};
use crate::store::{
    apply_input_merge, apply_node_write, evaluate_cas, CasOutcome, Result, Store, StoreError,
};
use crate::types::{NodeStatus, RunStatus};
use crate::webhooks::{WebhookConfig, WebhookEvent, WebhookSource};

/// Durable store over SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to `url` (e.g. `sqlite://flowrun.db`), creating the file
    /// when missing, and run embedded migrations when enabled.
    pub async fn connect(url: &str) -> Result<Self> {
        // Ensure the underlying file exists so a fresh deployment does not
        // need a manual touch step.
        if let Some(path) = url.strip_prefix("sqlite://") {
            let path = path.trim();
            if !path.is_empty() && path != ":memory:" {
                let p = std::path::Path::new(path);
                if let Some(parent) = p.parent() {
                    let _ = std::fs::create_dir_all(parent);
                }
                if !p.exists() {
                    let _ = std::fs::File::create_new(p);
                }
            }
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(url)
            .await
            .map_err(backend)?;

        #[cfg(feature = "sqlite-migrations")]
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| StoreError::Backend {
                message: format!("migration failed: {e}"),
            })?;

        Ok(Self { pool })
    }

    async fn load_node_states(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        run_id: &str,
    ) -> Result<BTreeMap<String, NodeState>> {
        let row = sqlx::query("SELECT node_states FROM runs WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(&mut **tx)
            .await
            .map_err(backend)?
            .ok_or_else(|| StoreError::NotFound {
                what: "run",
                id: run_id.to_string(),
            })?;
        let raw: String = row.try_get("node_states").map_err(backend)?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn save_node_states(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        run_id: &str,
        states: &BTreeMap<String, NodeState>,
    ) -> Result<()> {
        sqlx::query("UPDATE runs SET node_states = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(serde_json::to_string(states)?)
            .bind(Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&mut **tx)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend {
        message: err.to_string(),
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend {
            message: format!("bad timestamp {raw:?}: {e}"),
        })
}

fn decode_flow(row: &SqliteRow) -> Result<Flow> {
    Ok(Flow {
        id: row.try_get("id").map_err(backend)?,
        name: row.try_get("name").map_err(backend)?,
        current_version_id: row.try_get("current_version_id").map_err(backend)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
    })
}

fn decode_run(row: &SqliteRow) -> Result<Run> {
    let status_raw: String = row.try_get("status").map_err(backend)?;
    let status = RunStatus::parse(&status_raw).ok_or_else(|| StoreError::Backend {
        message: format!("unknown run status {status_raw:?}"),
    })?;
    let node_states_raw: String = row.try_get("node_states").map_err(backend)?;
    Ok(Run {
        id: row.try_get("id").map_err(backend)?,
        flow_id: row.try_get("flow_id").map_err(backend)?,
        version_id: row.try_get("version_id").map_err(backend)?,
        status,
        node_states: serde_json::from_str(&node_states_raw)?,
        entity_id: row.try_get("entity_id").map_err(backend)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(backend)?)?,
    })
}

fn decode_entity(row: &SqliteRow) -> Result<Entity> {
    let attributes_raw: String = row.try_get("attributes").map_err(backend)?;
    let kind_raw: Option<String> = row.try_get("entity_kind").map_err(backend)?;
    let entity_kind = match kind_raw.as_deref() {
        Some(raw) => Some(serde_json::from_value(Value::String(raw.to_string()))?),
        None => None,
    };
    Ok(Entity {
        id: row.try_get("id").map_err(backend)?,
        flow_id: row.try_get("flow_id").map_err(backend)?,
        email: row.try_get("email").map_err(backend)?,
        attributes: serde_json::from_str(&attributes_raw)?,
        entity_kind,
        current_node_id: row.try_get("current_node_id").map_err(backend)?,
        current_edge_id: row.try_get("current_edge_id").map_err(backend)?,
        edge_progress: row.try_get("edge_progress").map_err(backend)?,
        destination_node_id: row.try_get("destination_node_id").map_err(backend)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
        updated_at: parse_timestamp(&row.try_get::<String, _>("updated_at").map_err(backend)?)?,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_flow(&self, flow: Flow) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO flows (id, name, current_version_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&flow.id)
        .bind(&flow.name)
        .bind(&flow.current_version_id)
        .bind(flow.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_flow(&self, flow_id: &str) -> Result<Option<Flow>> {
        let row = sqlx::query("SELECT * FROM flows WHERE id = ?1")
            .bind(flow_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_flow).transpose()
    }

    async fn update_flow_current_version(&self, flow_id: &str, version_id: &str) -> Result<()> {
        let result = sqlx::query("UPDATE flows SET current_version_id = ?1 WHERE id = ?2")
            .bind(version_id)
            .bind(flow_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "flow",
                id: flow_id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_version(&self, version: Version) -> Result<()> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO flow_versions
             (id, flow_id, visual_graph, execution_graph, commit_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&version.id)
        .bind(&version.flow_id)
        .bind(serde_json::to_string(&version.visual_graph)?)
        .bind(serde_json::to_string(&version.execution_graph)?)
        .bind(&version.commit_message)
        .bind(version.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict {
                message: format!("version {} already exists", version.id),
            });
        }
        Ok(())
    }

    async fn get_version(&self, version_id: &str) -> Result<Option<Version>> {
        let row = sqlx::query("SELECT * FROM flow_versions WHERE id = ?1")
            .bind(version_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else { return Ok(None) };
        let visual_raw: String = row.try_get("visual_graph").map_err(backend)?;
        let execution_raw: String = row.try_get("execution_graph").map_err(backend)?;
        Ok(Some(Version {
            id: row.try_get("id").map_err(backend)?,
            flow_id: row.try_get("flow_id").map_err(backend)?,
            visual_graph: serde_json::from_str(&visual_raw)?,
            execution_graph: serde_json::from_str(&execution_raw)?,
            commit_message: row.try_get("commit_message").map_err(backend)?,
            created_at: parse_timestamp(&row.try_get::<String, _>("created_at").map_err(backend)?)?,
        }))
    }

    async fn list_version_metadata(&self, flow_id: &str) -> Result<Vec<VersionMeta>> {
        let rows = sqlx::query(
            "SELECT id, flow_id, commit_message, created_at FROM flow_versions
             WHERE flow_id = ?1 ORDER BY created_at DESC, id DESC",
        )
        .bind(flow_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.iter()
            .map(|row| {
                Ok(VersionMeta {
                    id: row.try_get("id").map_err(backend)?,
                    flow_id: row.try_get("flow_id").map_err(backend)?,
                    commit_message: row.try_get("commit_message").map_err(backend)?,
                    created_at: parse_timestamp(
                        &row.try_get::<String, _>("created_at").map_err(backend)?,
                    )?,
                })
            })
            .collect()
    }

    async fn create_run(&self, run: Run) -> Result<()> {
        sqlx::query(
            "INSERT INTO runs
             (id, flow_id, version_id, status, node_states, entity_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&run.id)
        .bind(&run.flow_id)
        .bind(&run.version_id)
        .bind(run.status.as_str())
        .bind(serde_json::to_string(&run.node_states)?)
        .bind(&run.entity_id)
        .bind(run.created_at.to_rfc3339())
        .bind(run.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM runs WHERE id = ?1")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_run).transpose()
    }

    async fn set_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let result = sqlx::query("UPDATE runs SET status = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(run_id)
            .execute(&self.pool)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                what: "run",
                id: run_id.to_string(),
            });
        }
        Ok(())
    }

    async fn update_node_state(
        &self,
        run_id: &str,
        node_id: &str,
        expected_from: &[NodeStatus],
        new_status: NodeStatus,
        output: Option<Value>,
        error: Option<String>,
    ) -> Result<CasOutcome> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut states = self.load_node_states(&mut tx, run_id).await?;
        let state = states.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
            what: "node state",
            id: format!("{run_id}/{node_id}"),
        })?;

        if !evaluate_cas(node_id, state.status, expected_from, new_status)? {
            let current = state.clone();
            tx.rollback().await.map_err(backend)?;
            return Ok(CasOutcome {
                applied: false,
                current,
            });
        }
        apply_node_write(state, new_status, output, error);
        let current = state.clone();
        self.save_node_states(&mut tx, run_id, &states).await?;
        tx.commit().await.map_err(backend)?;
        Ok(CasOutcome {
            applied: true,
            current,
        })
    }

    async fn merge_node_input(
        &self,
        run_id: &str,
        node_id: &str,
        source: MergeSource,
        patch: Value,
    ) -> Result<Value> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut states = self.load_node_states(&mut tx, run_id).await?;
        let state = states.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
            what: "node state",
            id: format!("{run_id}/{node_id}"),
        })?;
        let merged = apply_input_merge(state, &source, patch);
        self.save_node_states(&mut tx, run_id, &states).await?;
        tx.commit().await.map_err(backend)?;
        Ok(merged)
    }

    async fn append_collector_arrival(
        &self,
        run_id: &str,
        node_id: &str,
        upstream: &str,
        payload: Value,
        expected: usize,
    ) -> Result<CollectorTracking> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut states = self.load_node_states(&mut tx, run_id).await?;
        let state = states.get_mut(node_id).ok_or_else(|| StoreError::NotFound {
            what: "node state",
            id: format!("{run_id}/{node_id}"),
        })?;
        let tracking = state.collector.get_or_insert_with(|| CollectorTracking {
            expected,
            ..CollectorTracking::default()
        });
        if tracking.arrived.insert(upstream.to_string()) {
            tracking.received.push(CollectorArrival {
                upstream: upstream.to_string(),
                payload,
            });
        }
        let snapshot = tracking.clone();
        self.save_node_states(&mut tx, run_id, &states).await?;
        tx.commit().await.map_err(backend)?;
        Ok(snapshot)
    }

    async fn get_entity(&self, entity_id: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?1")
            .bind(entity_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_entity).transpose()
    }

    async fn find_entity_by_email(&self, flow_id: &str, email: &str) -> Result<Option<Entity>> {
        let row = sqlx::query("SELECT * FROM entities WHERE flow_id = ?1 AND email = ?2 LIMIT 1")
            .bind(flow_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.as_ref().map(decode_entity).transpose()
    }

    async fn upsert_entity(&self, entity: Entity) -> Result<()> {
        let kind = entity
            .entity_kind
            .map(|k| serde_json::to_value(k))
            .transpose()?
            .and_then(|v| v.as_str().map(str::to_string));
        sqlx::query(
            "INSERT OR REPLACE INTO entities
             (id, flow_id, email, attributes, entity_kind, current_node_id, current_edge_id,
              edge_progress, destination_node_id, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(&entity.id)
        .bind(&entity.flow_id)
        .bind(&entity.email)
        .bind(serde_json::to_string(&entity.attributes)?)
        .bind(kind)
        .bind(&entity.current_node_id)
        .bind(&entity.current_edge_id)
        .bind(entity.edge_progress)
        .bind(&entity.destination_node_id)
        .bind(entity.created_at.to_rfc3339())
        .bind(entity.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_webhook_config(&self, slug: &str) -> Result<Option<WebhookConfig>> {
        let row = sqlx::query("SELECT * FROM webhook_configs WHERE slug = ?1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        let Some(row) = row else { return Ok(None) };
        let source_raw: String = row.try_get("source").map_err(backend)?;
        let source: WebhookSource = serde_json::from_value(Value::String(source_raw))?;
        Ok(Some(WebhookConfig {
            slug: row.try_get("slug").map_err(backend)?,
            flow_id: row.try_get("flow_id").map_err(backend)?,
            secret: row.try_get("secret").map_err(backend)?,
            source,
            require_signature: row.try_get::<i64, _>("require_signature").map_err(backend)? != 0,
            active: row.try_get::<i64, _>("active").map_err(backend)? != 0,
        }))
    }

    async fn put_webhook_config(&self, config: WebhookConfig) -> Result<()> {
        let source = serde_json::to_value(config.source)?;
        let source = source.as_str().unwrap_or("generic").to_string();
        sqlx::query(
            "INSERT OR REPLACE INTO webhook_configs
             (slug, flow_id, secret, source, require_signature, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&config.slug)
        .bind(&config.flow_id)
        .bind(&config.secret)
        .bind(source)
        .bind(i64::from(config.require_signature))
        .bind(i64::from(config.active))
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn append_webhook_event(&self, event: WebhookEvent) -> Result<()> {
        sqlx::query(
            "INSERT INTO webhook_events (id, slug, received_at, outcome, entity_id, run_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&event.id)
        .bind(&event.slug)
        .bind(event.received_at.to_rfc3339())
        .bind(&event.outcome)
        .bind(&event.entity_id)
        .bind(&event.run_id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn webhook_event_processed(&self, slug: &str, dedup_key: &str) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO webhook_processed (slug, dedup_key) VALUES (?1, ?2)",
        )
        .bind(slug)
        .bind(dedup_key)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        // Zero rows affected means the key already existed: a replay.
        Ok(result.rows_affected() == 0)
    }
}
