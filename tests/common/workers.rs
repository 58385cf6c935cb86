#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowrun::workers::{DispatchMode, Worker, WorkerContext, WorkerError};

/// Sync worker that turns its branch payload into `"<branch>-done"`.
///
/// Accepts either a bare string input (splitter seed) or an object with a
/// `branch` field (indexed seed).
#[derive(Debug, Clone, Copy)]
pub struct SuffixWorker;

#[async_trait]
impl Worker for SuffixWorker {
    fn kind(&self) -> &str {
        "suffix"
    }

    async fn invoke(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let branch = input
            .as_str()
            .map(str::to_string)
            .or_else(|| input.get("branch").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| input.to_string());
        Ok(json!(format!("{branch}-done")))
    }
}

/// Sync worker that fails its first `failures` invocations, then succeeds.
#[derive(Debug, Clone)]
pub struct FlakyWorker {
    pub remaining: Arc<AtomicUsize>,
}

impl FlakyWorker {
    pub fn failing(failures: usize) -> Self {
        Self {
            remaining: Arc::new(AtomicUsize::new(failures)),
        }
    }
}

#[async_trait]
impl Worker for FlakyWorker {
    fn kind(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let before = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        if before > 0 {
            return Err(WorkerError::Invoke {
                message: "transient failure".to_string(),
            });
        }
        Ok(json!({"ok": true, "input": input}))
    }
}

/// Async worker that accepts the hand-off and does nothing; the test
/// drives completion through the callback path.
#[derive(Debug, Clone, Copy)]
pub struct AsyncNoopWorker;

#[async_trait]
impl Worker for AsyncNoopWorker {
    fn kind(&self) -> &str {
        "async-noop"
    }

    fn mode(&self) -> DispatchMode {
        DispatchMode::Async
    }

    async fn invoke(&self, _input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        Ok(Value::Null)
    }
}

/// Sync worker counting how many times it ran; used to assert downstream
/// nodes fire exactly once under duplicate deliveries.
#[derive(Debug, Clone)]
pub struct CountingWorker {
    pub invocations: Arc<AtomicUsize>,
}

impl CountingWorker {
    pub fn new() -> Self {
        Self {
            invocations: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Default for CountingWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for CountingWorker {
    fn kind(&self) -> &str {
        "counting"
    }

    async fn invoke(&self, input: Value, _ctx: WorkerContext) -> Result<Value, WorkerError> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(json!({"invocations": n, "input": input}))
    }
}
