//! The node execution contract.
//!
//! Every node kind — HTTP, Code, Delay, Webhook-wait, Router, LLM, Sub-flow,
//! Map — implements the same polymorphism point: `execute(task) -> Outcome`.
//! The richer `Outcome` (vs. a bare `Result<Value, NodeError>`) is what lets
//! a node suspend instead of parking a worker slot on a long wait.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::NodeError;

/// What a worker hands to an executor.
///
/// Distinct from `queue::NodeTask` (the dispatch envelope): by the time
/// this reaches `execute`, the Orchestrator has already resolved templates
/// into `resolved_inputs` and looked up the node's stored configuration.
#[derive(Clone)]
pub struct ExecuteTask {
    pub run_id: Uuid,
    pub node_id: String,
    pub node_config: Value,
    pub resolved_inputs: Value,
    pub retry_count: u32,
    pub deadline: DateTime<Utc>,
    pub stream_sink: Arc<dyn StreamSink>,
}

impl std::fmt::Debug for ExecuteTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecuteTask")
            .field("run_id", &self.run_id)
            .field("node_id", &self.node_id)
            .field("node_config", &self.node_config)
            .field("resolved_inputs", &self.resolved_inputs)
            .field("retry_count", &self.retry_count)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

/// Why an `Outcome::Failed` occurred. Drives both retry policy and the
/// event log entry recorded by the Orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transport,
    Permanent,
    Timeout,
    Cancelled,
}

/// Why a node suspended instead of completing inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuspendReason {
    Delay,
    Webhook,
    Subflow,
    Map,
}

/// The result of one `execute` call.
#[derive(Debug, Clone)]
pub enum Outcome {
    Completed {
        output: Value,
    },
    Failed {
        error_kind: ErrorKind,
        message: String,
        retryable: bool,
    },
    Suspended {
        token: Option<String>,
        wake_at: Option<DateTime<Utc>>,
        reason: SuspendReason,
    },
    SpawnedChildren {
        map_batch_id: Option<Uuid>,
        subflow_child_run_id: Option<Uuid>,
    },
}

impl Outcome {
    /// Build a `Failed` outcome from an internal [`NodeError`], classifying
    /// retryability from the error kind unless the executor already knows
    /// better (transport errors retry, permanent/cancelled never do; a
    /// timeout's retryability is the executor's call, carried on `err`).
    pub fn failed(kind: ErrorKind, err: NodeError) -> Self {
        let retryable = match kind {
            ErrorKind::Transport => true,
            ErrorKind::Permanent | ErrorKind::Cancelled => false,
            ErrorKind::Timeout => err.is_retryable(),
        };
        Outcome::Failed {
            error_kind: kind,
            message: err.message().to_owned(),
            retryable,
        }
    }

    pub fn transport_failed(message: impl Into<String>) -> Self {
        Outcome::failed(ErrorKind::Transport, NodeError::Retryable(message.into()))
    }

    pub fn permanent_failed(message: impl Into<String>) -> Self {
        Outcome::failed(ErrorKind::Permanent, NodeError::Fatal(message.into()))
    }

    pub fn timeout(message: impl Into<String>, retryable: bool) -> Self {
        let err = if retryable {
            NodeError::Retryable(message.into())
        } else {
            NodeError::Fatal(message.into())
        };
        Outcome::failed(ErrorKind::Timeout, err)
    }

    pub fn cancelled() -> Self {
        Outcome::failed(ErrorKind::Cancelled, NodeError::Fatal("run cancelled".into()))
    }
}

/// A chunk pushed to the stream publisher. Delivery is best-effort — the
/// event log, not the stream, is authoritative.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamChunk {
    Progress { node_id: String, message: String },
    Token { node_id: String, index: u32, content: String },
    Complete { node_id: String },
    Error { node_id: String, message: String },
}

/// Fire-and-forget sink executors push progress into. A dropped or slow
/// consumer must never block execution — callers shouldn't await this for
/// longer than it takes to hand the chunk to a channel.
#[async_trait]
pub trait StreamSink: Send + Sync {
    async fn publish(&self, chunk: StreamChunk);
}

/// Discards everything. Used where no live consumer is attached — CLI
/// `validate`, replay, most unit tests.
pub struct NullSink;

#[async_trait]
impl StreamSink for NullSink {
    async fn publish(&self, _chunk: StreamChunk) {}
}

/// The contract every node kind fulfils. The dispatcher selects an
/// implementation by `node_type` tag; there is no inheritance, just this
/// one polymorphism point.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, task: &ExecuteTask) -> Outcome;
}
