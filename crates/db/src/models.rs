//! Row structs that map 1-to-1 onto database tables.
//!
//! These are *persistence* models — they carry no domain behaviour.
//! Domain types (graphs, node kinds, outcomes) live in the `engine` and
//! `nodes` crates; this crate only knows JSON blobs and scalar columns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// workflows
// ---------------------------------------------------------------------------

/// A persisted workflow: identity, editable draft graph, and a pointer to
/// whichever version is currently published.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRow {
    pub id: i64,
    pub name: String,
    pub graph: serde_json::Value,
    pub active_version_id: Option<Uuid>,
    pub share_version: i32,
    pub schedule_enabled: bool,
    pub schedule_cron: Option<String>,
    pub schedule_timezone: Option<String>,
    pub schedule_next_run: Option<DateTime<Utc>>,
    pub overlap_mode: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_versions
// ---------------------------------------------------------------------------

/// An immutable snapshot of a workflow's graph, created on publish.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowVersionRow {
    pub id: Uuid,
    pub workflow_id: i64,
    pub version_number: i32,
    pub graph: serde_json::Value,
    pub input_schema: Option<serde_json::Value>,
    pub output_schema: Option<serde_json::Value>,
    pub change_summary: Option<String>,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// workflow_runs
// ---------------------------------------------------------------------------

/// A durable run row. `snapshot_graph` is copied at creation time and never
/// re-read from the live workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunRow {
    pub id: Uuid,
    pub workflow_id: i64,
    pub workflow_version_id: Option<Uuid>,
    pub snapshot_graph: serde_json::Value,
    pub status: String,
    pub trigger: String,
    pub input_data: serde_json::Value,
    pub output_data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub pinned: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub parent_run_id: Option<Uuid>,
    pub parent_node_id: Option<String>,
    pub depth: i32,
    /// Set only for a run spawned as one item of a Map node's fan-out —
    /// the `$map.index` its child graph's templates may reference.
    /// `input_data` doubles as `$map.item` in that case.
    pub map_index: Option<i32>,
}

// ---------------------------------------------------------------------------
// run_events
// ---------------------------------------------------------------------------

/// One row of the append-only event log.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunEventRow {
    pub id: i64,
    pub run_id: Uuid,
    pub node_id: Option<String>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub retry_count: Option<i32>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// batch_operations / batch_results
// ---------------------------------------------------------------------------

/// A map node's batch bookkeeping row. One per map node per run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchOperationRow {
    pub id: Uuid,
    pub run_id: Uuid,
    pub node_id: String,
    pub total_items: i32,
    pub concurrency_limit: i32,
    pub fail_fast: bool,
    pub input_items: serde_json::Value,
    pub child_workflow_id: i64,
    pub child_version_id: Option<Uuid>,
    pub child_graph: Option<serde_json::Value>,
    pub child_depth: Option<i32>,
    pub timeout_ms: Option<i64>,
    pub current_index: i32,
    pub active_count: i32,
    pub completed_count: i32,
    pub failed_count: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One child run's terminal result, keyed by its position in `input_items`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BatchResultRow {
    pub batch_id: Uuid,
    pub item_index: i32,
    pub child_run_id: Option<Uuid>,
    pub status: String,
    pub output: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// scheduled_events
// ---------------------------------------------------------------------------

/// A time-based event the Scheduler is responsible for promoting.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScheduledEventRow {
    pub id: Uuid,
    pub kind: String,
    pub due_at: DateTime<Utc>,
    pub target_run_id: Option<Uuid>,
    pub target_node_id: Option<String>,
    pub target_workflow_id: Option<i64>,
    pub payload: serde_json::Value,
    pub claimed_at: Option<DateTime<Utc>>,
    pub consumed: bool,
}

// ---------------------------------------------------------------------------
// suspension_tokens
// ---------------------------------------------------------------------------

/// An opaque, single-use resume token minted by a webhook-wait node.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SuspensionTokenRow {
    pub token: String,
    pub run_id: Uuid,
    pub node_id: String,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}
