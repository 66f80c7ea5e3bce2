//! The Orchestrator — owns run creation, successor computation, and the
//! resume protocol. This is the only place that writes `run_events` for
//! anything beyond a node's own dispatch.
//!
//! Every entry point here is written to be safe under at-least-once
//! delivery: duplicate completions, duplicate resumes, and late arrivals
//! after a run has already gone terminal are all no-ops, not errors.

use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::RunRow;
use db::repository::{events, runs, suspensions, workflows};
use db::DbPool;

use nodes::template::{self, Scope};
use nodes::traits::ExecuteTask;
use nodes::{Outcome, StreamSink, SuspendReason};
use queue::{DispatchQueue, NodeTask};

use crate::dag::{frontier_nodes, NODE_KIND_MAP, NODE_KIND_ROUTER, NODE_KIND_SUBFLOW};
use crate::models::{Edge, Graph, NodeDefinition};
use crate::run::{FoldedRun, RunStatus, NODE_COMPLETED, NODE_FAILED, NODE_RESUMED, NODE_RETRIED, NODE_SCHEDULED, NODE_STARTED, NODE_SUSPENDED, RUN_CANCELLED, RUN_COMPLETED, RUN_CREATED, RUN_FAILED};
use crate::EngineError;

/// Sub-flow/map nesting cap. A run at depth `MAX_DEPTH` may not spawn a
/// depth-`MAX_DEPTH + 1` child.
pub const MAX_DEPTH: i32 = 10;

/// Default per-node dispatch timeout, used when nothing more specific is
/// configured (a node-level `timeout_ms` always takes precedence).
const DEFAULT_TASK_TIMEOUT: ChronoDuration = ChronoDuration::seconds(300);

pub struct ParentLink {
    pub parent_run_id: Uuid,
    pub parent_node_id: String,
    pub depth: i32,
    /// Set when this child is one item of a Map node's fan-out — becomes
    /// the child run's `map_index`, exposing `$map.index`/`$map.item` to
    /// every node in the child graph.
    pub map_index: Option<i32>,
}

pub struct CreateRunRequest {
    pub workflow_id: i64,
    pub version_id: Option<Uuid>,
    pub input: Value,
    pub trigger: String,
    pub parent_link: Option<ParentLink>,
}

/// Create a new run: resolve the graph to execute (pinned version or the
/// workflow's current active version), persist it, and dispatch its
/// initial frontier.
pub async fn create_run(pool: &DbPool, queue: &dyn DispatchQueue, req: CreateRunRequest) -> Result<Uuid, EngineError> {
    let (version_id, graph_value, pinned) = if let Some(vid) = req.version_id {
        let version = db::repository::versions::get_version(pool, vid).await?;
        (Some(version.id), version.graph, true)
    } else {
        let workflow = workflows::get_workflow(pool, req.workflow_id).await?;
        let active_id = workflow.active_version_id.ok_or(EngineError::NoActiveVersion)?;
        let version = db::repository::versions::get_version(pool, active_id).await?;
        (Some(version.id), version.graph, false)
    };

    create_run_from_snapshot(pool, queue, req.workflow_id, version_id, graph_value, req.input, req.trigger, pinned, req.parent_link, None).await
}

/// Create a run from an already-resolved graph snapshot, bypassing
/// version lookup. Used both by [`create_run`] and by the map engine,
/// which caches the child graph once at batch creation instead of
/// re-resolving it per spawned item.
///
/// `provided_run_id`, when set, is used as the new run's id instead of
/// generating one. The map engine relies on this: it needs the child's
/// run id to record the batch/item linkage *before* the run exists, so a
/// child that completes unusually fast can never race ahead of that
/// bookkeeping.
#[allow(clippy::too_many_arguments)]
pub async fn create_run_from_snapshot(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    workflow_id: i64,
    version_id: Option<Uuid>,
    snapshot_graph: Value,
    input: Value,
    trigger: String,
    pinned: bool,
    parent_link: Option<ParentLink>,
    provided_run_id: Option<Uuid>,
) -> Result<Uuid, EngineError> {
    let depth = parent_link.as_ref().map(|p| p.depth).unwrap_or(0);
    if depth > MAX_DEPTH {
        return Err(EngineError::DepthExceeded);
    }

    let graph: Graph = serde_json::from_value(snapshot_graph.clone())?;
    let frontier = frontier_nodes(&graph);

    let run_id = provided_run_id.unwrap_or_else(Uuid::new_v4);

    let mut tx = pool.begin().await?;
    let new_run = runs::NewRun {
        id: run_id,
        workflow_id,
        workflow_version_id: version_id,
        snapshot_graph: snapshot_graph.clone(),
        trigger: trigger.clone(),
        input_data: input,
        pinned,
        parent_run_id: parent_link.as_ref().map(|p| p.parent_run_id),
        parent_node_id: parent_link.as_ref().map(|p| p.parent_node_id.clone()),
        depth,
        map_index: parent_link.as_ref().and_then(|p| p.map_index),
    };
    runs::create_run(&mut tx, &new_run).await?;
    runs::set_status_tx(&mut tx, run_id, "running").await?;
    events::append_tx(&mut tx, run_id, None, RUN_CREATED, json!({ "trigger": trigger }), None).await?;
    for node in &frontier {
        events::append_tx(&mut tx, run_id, Some(&node.id), NODE_SCHEDULED, Value::Null, None).await?;
    }
    tx.commit().await?;

    for node in &frontier {
        queue
            .push(NodeTask::new(run_id, node.id.clone(), node.node_type.clone(), DEFAULT_TASK_TIMEOUT))
            .await
            .map_err(EngineError::Queue)?;
    }

    Ok(run_id)
}

/// Record that a worker has picked up a node for execution. Called before
/// building the node's `ExecuteTask`; the event this appends is what lets
/// the run-completion check distinguish "scheduled but never started"
/// from "ran and terminated".
pub async fn mark_started(pool: &DbPool, run_id: Uuid, node_id: &str, retry_count: i32) -> Result<(), EngineError> {
    events::append(pool, run_id, Some(node_id), NODE_STARTED, Value::Null, Some(retry_count)).await?;
    Ok(())
}

/// Build the `ExecuteTask` for a node: resolve its config's template
/// expressions against prior node outputs, and resolve its primary input
/// (the completed output of its single predecessor, or the run's own
/// input for a frontier node).
#[allow(clippy::too_many_arguments)]
pub fn build_execute_task(
    run: &RunRow,
    graph: &Graph,
    folded: &FoldedRun,
    node_id: &str,
    retry_count: u32,
    deadline: DateTime<Utc>,
    env: &HashMap<String, String>,
    stream_sink: std::sync::Arc<dyn StreamSink>,
) -> Result<ExecuteTask, EngineError> {
    let node = graph.nodes.iter().find(|n| n.id == node_id).ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))?;
    let node_config = render_node_config(node, run, folded, env);
    let resolved_inputs = primary_input(run, graph, folded, node_id);

    Ok(ExecuteTask { run_id: run.id, node_id: node_id.to_owned(), node_config, resolved_inputs, retry_count, deadline, stream_sink })
}

/// Resolve a node's config templates against prior node outputs, `$env`,
/// and — for a run spawned as one item of a Map node's fan-out — the
/// `$map.item`/`$map.index` scope (§4.2, §4.6). `run.input_data` is the
/// item itself for a map-spawned run, so it doubles as `$map.item`.
fn render_node_config(node: &NodeDefinition, run: &RunRow, folded: &FoldedRun, env: &HashMap<String, String>) -> Value {
    let (map_item, map_index) = match run.map_index {
        Some(index) => (Some(run.input_data.clone()), Some(index as i64)),
        None => (None, None),
    };
    let scope = Scope { node_outputs: folded.node_outputs(), env: env.clone(), map_item, map_index };
    template::render_value(&node.config, &scope)
}

fn primary_input(run: &RunRow, graph: &Graph, folded: &FoldedRun, node_id: &str) -> Value {
    match graph.edges.iter().find(|e| e.to == node_id) {
        Some(pred) => folded.terminal.get(&pred.from).cloned().flatten().unwrap_or(Value::Null),
        None => run.input_data.clone(),
    }
}

/// Apply the outcome of one node's execution: terminate it, retry it, or
/// suspend it, then (for a terminal result) compute successors.
#[allow(clippy::too_many_arguments)]
pub async fn handle_outcome(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    env: &HashMap<String, String>,
    run_id: Uuid,
    node_id: &str,
    node_type: &str,
    retry_count: u32,
    task_timeout: ChronoDuration,
    outcome: Outcome,
) -> Result<(), EngineError> {
    let run = runs::get_run(pool, run_id).await?;
    if run.status != "running" {
        return Ok(()); // terminal or cancelled — a late delivery is a no-op
    }

    match outcome {
        Outcome::Completed { output } => complete_node(pool, queue, &run, node_id, retry_count as i32, output).await,
        Outcome::Failed { message, retryable, .. } if retryable => {
            retry_node(pool, queue, &run, node_id, node_type, retry_count, task_timeout, message).await
        }
        Outcome::Failed { message, .. } => fail_node(pool, queue, &run, node_id, retry_count as i32, message).await,
        Outcome::Suspended { wake_at, reason, .. } => suspend_node(pool, queue, &run, node_id, retry_count as i32, wake_at, reason, env).await,
        Outcome::SpawnedChildren { .. } => complete_node(pool, queue, &run, node_id, retry_count as i32, Value::Null).await,
    }
}

/// Resume a suspended node: a webhook delivery, a delay wakeup, or a
/// sub-flow/map child's terminal result. Respects the same idempotency
/// key as ordinary completion, so a duplicate resume is a no-op.
pub async fn resume(pool: &DbPool, queue: &dyn DispatchQueue, run_id: Uuid, node_id: &str, outcome: Outcome) -> Result<(), EngineError> {
    let run = runs::get_run(pool, run_id).await?;
    if run.status != "running" {
        return Ok(());
    }

    let events_log = events::list_for_run(pool, run_id).await?;
    let folded = FoldedRun::fold(&events_log);
    let retry_count = folded.retry_counts.get(node_id).copied().unwrap_or(0);

    events::append(pool, run_id, Some(node_id), NODE_RESUMED, Value::Null, Some(retry_count)).await?;

    match outcome {
        Outcome::Completed { output } => complete_node(pool, queue, &run, node_id, retry_count, output).await,
        Outcome::Failed { message, .. } => fail_node(pool, queue, &run, node_id, retry_count, message).await,
        Outcome::Suspended { .. } | Outcome::SpawnedChildren { .. } => Ok(()), // a resume cannot itself re-suspend
    }
}

/// Cancel a run (and recursively, any still-active children): mark it
/// `cancelled`, release outstanding suspensions/batches, and stop.
pub async fn cancel(pool: &DbPool, run_id: Uuid) -> Result<(), EngineError> {
    let run = runs::get_run(pool, run_id).await?;
    if run.status == "pending" || run.status == "running" {
        events::append(pool, run_id, None, RUN_CANCELLED, Value::Null, None).await?;
        runs::finalize(pool, run_id, "cancelled", None, None).await?;
        cancel_outstanding(pool, run_id).await?;
    }

    for child in runs::find_active_children(pool, run_id).await? {
        Box::pin(cancel(pool, child.id)).await?;
    }

    Ok(())
}

/// Fail a whole run with no originating node — the Scheduler's stale-run
/// reaper feed, for runs that have been `running` past `max_wall_time`
/// with no sign of progress. Mirrors [`propagate_failure`]'s shape, minus
/// the node-specific error extraction.
pub async fn fail_run(pool: &DbPool, queue: &dyn DispatchQueue, run_id: Uuid, reason: &str) -> Result<(), EngineError> {
    let run = runs::get_run(pool, run_id).await?;
    if run.status != "running" && run.status != "pending" {
        return Ok(());
    }

    events::append(pool, run.id, None, RUN_FAILED, json!({ "error": reason }), None).await?;
    runs::finalize(pool, run.id, "failed", None, Some(reason)).await?;
    cancel_outstanding(pool, run.id).await?;

    for child in runs::find_active_children(pool, run.id).await? {
        Box::pin(cancel(pool, child.id)).await?;
    }

    propagate_to_parent(pool, queue, &run, "failed", None, Some(reason.to_owned())).await
}

async fn cancel_outstanding(pool: &DbPool, run_id: Uuid) -> Result<(), EngineError> {
    for batch in db::repository::batches::list_open_for_run(pool, run_id).await? {
        let mut tx = pool.begin().await?;
        db::repository::batches::set_status(&mut tx, batch.id, "cancelled").await?;
        tx.commit().await?;
    }
    Ok(())
}

async fn complete_node(pool: &DbPool, queue: &dyn DispatchQueue, run: &RunRow, node_id: &str, retry_count: i32, output: Value) -> Result<(), EngineError> {
    let inserted = events::append_terminal(pool, run.id, node_id, NODE_COMPLETED, json!({ "output": output }), retry_count).await?;
    if inserted.is_none() {
        return Ok(()); // duplicate delivery of the same terminal event
    }
    schedule_successors(pool, queue, run, node_id, true).await
}

async fn fail_node(pool: &DbPool, queue: &dyn DispatchQueue, run: &RunRow, node_id: &str, retry_count: i32, message: String) -> Result<(), EngineError> {
    let inserted = events::append_terminal(pool, run.id, node_id, NODE_FAILED, json!({ "error": message }), retry_count).await?;
    if inserted.is_none() {
        return Ok(());
    }
    schedule_successors(pool, queue, run, node_id, false).await
}

async fn retry_node(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    run: &RunRow,
    node_id: &str,
    node_type: &str,
    retry_count: u32,
    task_timeout: ChronoDuration,
    message: String,
) -> Result<(), EngineError> {
    events::append(pool, run.id, Some(node_id), NODE_RETRIED, json!({ "error": message, "retry_count": retry_count }), Some(retry_count as i32)).await?;

    let mut task = NodeTask::new(run.id, node_id, node_type, task_timeout);
    task.attempt = retry_count + 1;
    queue.push(task).await.map_err(EngineError::Queue)
}

#[allow(clippy::too_many_arguments)]
async fn suspend_node(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    run: &RunRow,
    node_id: &str,
    retry_count: i32,
    wake_at: Option<DateTime<Utc>>,
    reason: SuspendReason,
    env: &HashMap<String, String>,
) -> Result<(), EngineError> {
    let graph: Graph = serde_json::from_value(run.snapshot_graph.clone())?;
    let events_log = events::list_for_run(pool, run.id).await?;
    let folded = FoldedRun::fold(&events_log);
    let node = graph.nodes.iter().find(|n| n.id == node_id).ok_or_else(|| EngineError::NodeNotFound(node_id.to_owned()))?;
    let resolved_config = render_node_config(node, run, &folded, env);

    let mut spawned_map_batch: Option<Uuid> = None;

    let reference = match reason {
        SuspendReason::Webhook => {
            let expires_at = wake_at.unwrap_or_else(|| Utc::now() + ChronoDuration::hours(24));
            suspensions::create(pool, run.id, node_id, expires_at).await?.token
        }
        SuspendReason::Delay => {
            let due_at = wake_at.unwrap_or_else(Utc::now);
            db::repository::scheduled_events::schedule(pool, "DELAY_WAKEUP", due_at, Some(run.id), Some(node_id), None, Value::Null).await?;
            due_at.to_rfc3339()
        }
        SuspendReason::Subflow => {
            let config: nodes::subflow::SubflowConfig = serde_json::from_value(resolved_config)?;
            let resolved_inputs = primary_input(run, &graph, &folded, node_id);
            match create_run(
                pool,
                queue,
                CreateRunRequest {
                    workflow_id: config.child_workflow_id,
                    version_id: config.child_version_id,
                    input: resolved_inputs,
                    trigger: "subflow".into(),
                    parent_link: Some(ParentLink { parent_run_id: run.id, parent_node_id: node_id.to_owned(), depth: run.depth + 1, map_index: None }),
                },
            )
            .await
            {
                Ok(child_id) => child_id.to_string(),
                Err(EngineError::DepthExceeded) => {
                    return fail_node(pool, queue, run, node_id, retry_count, "sub-flow nesting depth exceeded".into()).await;
                }
                Err(e) => return Err(e),
            }
        }
        SuspendReason::Map => match crate::mapengine::create_batch_and_spawn(pool, queue, run, node_id, resolved_config).await {
            Ok(batch_id) => {
                spawned_map_batch = Some(batch_id);
                batch_id.to_string()
            }
            Err(EngineError::DepthExceeded) => {
                return fail_node(pool, queue, run, node_id, retry_count, "map nesting depth exceeded".into()).await;
            }
            Err(e) => return Err(e),
        },
    };

    events::append(pool, run.id, Some(node_id), NODE_SUSPENDED, json!({ "reason": reason, "reference": reference }), Some(retry_count)).await?;

    // A zero-item map never has an active child to trigger completion from
    // `on_child_terminal` — check right after the suspension is durably
    // logged, so the log always shows NODE_SUSPENDED before any resume.
    if let Some(batch_id) = spawned_map_batch {
        crate::mapengine::finalize_if_done(pool, queue, batch_id).await?;
    }

    Ok(())
}

/// Compute and dispatch (or skip) the successors of a just-terminated
/// node, then check whether the whole run is now complete.
async fn schedule_successors(pool: &DbPool, queue: &dyn DispatchQueue, run: &RunRow, node_id: &str, success: bool) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    runs::lock_run(&mut tx, run.id).await?;

    let graph: Graph = serde_json::from_value(run.snapshot_graph.clone())?;
    let events_log = events::list_for_run(pool, run.id).await?;
    let folded = FoldedRun::fold(&events_log);

    let node_kind = graph.nodes.iter().find(|n| n.id == node_id).map(|n| n.node_type.as_str()).unwrap_or_default();
    let mut outgoing: Vec<&Edge> = graph.edges.iter().filter(|e| e.from == node_id).collect();

    match node_kind {
        NODE_KIND_ROUTER => {
            let matched = folded.matched_outputs.get(node_id).cloned().unwrap_or_default();
            outgoing.retain(|e| e.source_handle.as_deref().map(|h| matched.iter().any(|m| m == h)).unwrap_or(false));
        }
        NODE_KIND_SUBFLOW | NODE_KIND_MAP => {
            let branch_ok = folded
                .terminal
                .get(node_id)
                .and_then(|v| v.as_ref())
                .and_then(|output| output.get("child_status").or_else(|| output.get("status")))
                .and_then(|v| v.as_str())
                .map(|s| s == "completed")
                .unwrap_or(success);
            let handle = if branch_ok { "success" } else { "error" };
            outgoing.retain(|e| e.source_handle.as_deref() == Some(handle));
        }
        _ if !success => {
            let has_error_handle = graph.edges.iter().any(|e| e.from == node_id && e.source_handle.as_deref() == Some("error"));
            if has_error_handle {
                outgoing.retain(|e| e.source_handle.as_deref() == Some("error"));
            } else {
                tx.commit().await?;
                return propagate_failure(pool, queue, run, node_id).await;
            }
        }
        _ => {}
    }

    let mut to_dispatch: Vec<(String, String)> = Vec::new();
    for edge in outgoing {
        let Some(target) = graph.nodes.iter().find(|n| n.id == edge.to) else { continue };
        if folded.scheduled.contains(&target.id) {
            continue; // already scheduled via another predecessor edge
        }

        let predecessors: Vec<&Edge> = graph.edges.iter().filter(|e| e.to == target.id).collect();
        let ready = predecessors.iter().all(|e| !folded.visited.contains(&e.from) || folded.terminal.contains_key(&e.from));
        if !ready {
            continue;
        }

        events::append_tx(&mut tx, run.id, Some(&target.id), NODE_SCHEDULED, Value::Null, None).await?;
        to_dispatch.push((target.id.clone(), target.node_type.clone()));
    }

    tx.commit().await?;

    for (target_id, target_type) in &to_dispatch {
        queue.push(NodeTask::new(run.id, target_id.clone(), target_type.clone(), DEFAULT_TASK_TIMEOUT)).await.map_err(EngineError::Queue)?;
    }

    // Re-fold including the NODE_SCHEDULED events just committed, to
    // decide whether the run as a whole is now done.
    let events_log = events::list_for_run(pool, run.id).await?;
    let folded = FoldedRun::fold(&events_log);
    check_terminal(pool, queue, run, &graph, &folded).await
}

async fn check_terminal(pool: &DbPool, queue: &dyn DispatchQueue, run: &RunRow, graph: &Graph, folded: &FoldedRun) -> Result<(), EngineError> {
    let all_terminal = graph.nodes.iter().all(|n| !folded.scheduled.contains(&n.id) || folded.terminal.contains_key(&n.id));
    if !all_terminal {
        return Ok(());
    }
    if folded.status != Some(RunStatus::Running) {
        return Ok(()); // already finalized by a concurrent completion
    }

    let output = json!(folded.node_outputs());
    events::append(pool, run.id, None, RUN_COMPLETED, json!({ "output": output }), None).await?;
    runs::finalize(pool, run.id, "completed", Some(output.clone()), None).await?;
    propagate_to_parent(pool, queue, run, "completed", Some(output), None).await
}

async fn propagate_failure(pool: &DbPool, queue: &dyn DispatchQueue, run: &RunRow, node_id: &str) -> Result<(), EngineError> {
    let events_log = events::list_for_run(pool, run.id).await?;
    let error_message = events_log
        .iter()
        .rev()
        .find(|e| e.node_id.as_deref() == Some(node_id) && e.event_type == NODE_FAILED)
        .and_then(|e| e.payload.get("error").and_then(|v| v.as_str()))
        .unwrap_or("node failed")
        .to_owned();

    events::append(pool, run.id, None, RUN_FAILED, json!({ "node_id": node_id, "error": error_message }), None).await?;
    runs::finalize(pool, run.id, "failed", None, Some(&error_message)).await?;
    cancel_outstanding(pool, run.id).await?;
    propagate_to_parent(pool, queue, run, "failed", None, Some(error_message)).await
}

async fn propagate_to_parent(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    run: &RunRow,
    status: &str,
    output: Option<Value>,
    error: Option<String>,
) -> Result<(), EngineError> {
    let Some(parent_run_id) = run.parent_run_id else { return Ok(()) };
    let Some(parent_node_id) = run.parent_node_id.clone() else { return Ok(()) };

    let parent_run = runs::get_run(pool, parent_run_id).await?;
    let parent_graph: Graph = serde_json::from_value(parent_run.snapshot_graph.clone())?;
    let parent_node_kind = parent_graph.nodes.iter().find(|n| n.id == parent_node_id).map(|n| n.node_type.as_str());

    if parent_node_kind == Some(NODE_KIND_MAP) {
        if let Some(batch) = db::repository::batches::find_by_run_node(pool, parent_run_id, &parent_node_id).await? {
            return crate::mapengine::on_child_terminal(pool, queue, batch.id, run, status, output, error).await;
        }
    }

    let outcome = Outcome::Completed { output: json!({ "child_status": status, "child_output": output.or(error.map(Value::String)) }) };
    resume(pool, queue, parent_run_id, &parent_node_id, outcome).await
}
