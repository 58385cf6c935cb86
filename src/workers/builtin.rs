//! Builtin workers.
//!
//! Three workers ship with the engine: `echo` (sync pass-through used by
//! smoke flows and tests), `transform` (sync, config-driven field
//! reshaping), and `http` (async hand-off to an external service that
//! reports back through the callback endpoint).

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::{DispatchMode, Worker, WorkerContext, WorkerError};

/// Sync worker that returns its input augmented with an `echoed` field.
///
/// `echoed` mirrors the `prompt` input when present, otherwise the whole
/// input value.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoWorker;

#[async_trait]
impl Worker for EchoWorker {
    fn kind(&self) -> &str {
        "echo"
    }

    fn output_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"echoed": {"type": "string"}}
        })
    }

    async fn invoke(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let echoed = input.get("prompt").cloned().unwrap_or_else(|| input.clone());
        let mut out = match input {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        out.insert("echoed".to_string(), echoed);
        Ok(Value::Object(out))
    }
}

/// Sync worker that reshapes its input per node configuration.
///
/// Config keys:
/// - `rename`: object of `{from: to}` key renames
/// - `set`: object of static key/value pairs merged into the output
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformWorker;

#[async_trait]
impl Worker for TransformWorker {
    fn kind(&self) -> &str {
        "transform"
    }

    async fn invoke(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError> {
        let mut out = match input {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };

        if let Some(renames) = ctx.config.get("rename").and_then(Value::as_object) {
            for (from, to) in renames {
                if let (Some(value), Some(to)) = (out.remove(from), to.as_str()) {
                    out.insert(to.to_string(), value);
                }
            }
        }
        if let Some(extra) = ctx.config.get("set").and_then(Value::as_object) {
            for (k, v) in extra {
                out.insert(k.clone(), v.clone());
            }
        }
        Ok(Value::Object(out))
    }
}

/// Async worker that POSTs the input to a configured URL together with the
/// callback URL, then returns immediately. The remote service completes
/// the node later via `POST /callback/{run}/{node}`.
#[derive(Clone, Debug)]
pub struct HttpWorker {
    client: reqwest::Client,
}

impl HttpWorker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for HttpWorker {
    fn kind(&self) -> &str {
        "http"
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Async
    }

    async fn invoke(&self, input: Value, ctx: WorkerContext) -> Result<Value, WorkerError> {
        let url = ctx
            .config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| WorkerError::Invoke {
                message: format!("http worker on node {:?} has no config.url", ctx.node_id),
            })?;
        let body = json!({
            "input": input,
            "callbackUrl": ctx.callback_url,
        });
        let response = self.client.post(url).json(&body).send().await?;
        if !response.status().is_success() {
            return Err(WorkerError::Invoke {
                message: format!("http worker target returned {}", response.status()),
            });
        }
        // Output arrives through the callback endpoint.
        Ok(Value::Null)
    }
}
