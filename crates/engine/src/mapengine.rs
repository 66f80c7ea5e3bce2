//! The map node's batch engine (§4.6): fans `input_items` out to child
//! runs with bounded concurrency, tracks per-item results, and resumes
//! the parent map node once every item has a terminal outcome.
//!
//! `batch_operations` is the hot-contention counter row (mutated under
//! `SELECT … FOR UPDATE`); `batch_results` is the append-only per-item
//! table. Keeping counters and results in separate tables is what lets
//! [`spawn_more`] and [`on_child_terminal`] touch only the row they need,
//! instead of contending on one wide table.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use db::models::{BatchOperationRow, RunRow};
use db::repository::{batches, runs, workflows};
use db::DbPool;

use nodes::map::MapConfig;
use nodes::{ErrorKind, Outcome};
use queue::DispatchQueue;

use crate::orchestrator::{self, ParentLink, MAX_DEPTH};
use crate::EngineError;

/// Resolve the child graph (pinned version or the workflow's current
/// active version), create the `batch_operations` row, and spawn the
/// first wave of children up to `concurrency_limit`.
pub async fn create_batch_and_spawn(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    run: &RunRow,
    node_id: &str,
    resolved_config: Value,
) -> Result<Uuid, EngineError> {
    let config: MapConfig = serde_json::from_value(resolved_config)?;

    let child_depth = run.depth + 1;
    if child_depth > MAX_DEPTH {
        return Err(EngineError::DepthExceeded);
    }

    let (child_version_id, child_graph) = if let Some(vid) = config.child_version_id {
        let version = db::repository::versions::get_version(pool, vid).await?;
        (Some(version.id), version.graph)
    } else {
        let workflow = workflows::get_workflow(pool, config.child_workflow_id).await?;
        let active_id = workflow.active_version_id.ok_or(EngineError::NoActiveVersion)?;
        let version = db::repository::versions::get_version(pool, active_id).await?;
        (Some(version.id), version.graph)
    };

    let batch_id = Uuid::new_v4();
    let new_batch = batches::NewBatch {
        id: batch_id,
        run_id: run.id,
        node_id: node_id.to_owned(),
        total_items: config.input_items.len() as i32,
        concurrency_limit: config.concurrency_limit,
        fail_fast: config.fail_fast,
        input_items: json!(config.input_items),
        child_workflow_id: config.child_workflow_id,
        child_version_id,
        child_graph: Some(child_graph),
        child_depth: Some(child_depth),
        timeout_ms: config.timeout_ms,
    };
    batches::create_batch(pool, &new_batch).await?;

    spawn_more(pool, queue, batch_id).await?;
    Ok(batch_id)
}

/// Spawn as many children as the batch's concurrency budget currently
/// allows. Safe to call repeatedly — a batch that isn't `running`, or
/// that has no free slots or no remaining items, is a no-op.
pub async fn spawn_more(pool: &DbPool, queue: &dyn DispatchQueue, batch_id: Uuid) -> Result<(), EngineError> {
    loop {
        let mut tx = pool.begin().await?;
        let batch = batches::lock_batch(&mut tx, batch_id).await?;

        if batch.status != "running" || batch.active_count >= batch.concurrency_limit || batch.current_index >= batch.total_items {
            return Ok(());
        }

        let item_index = batches::claim_next_item(&mut tx, batch_id).await?;
        let child_run_id = Uuid::new_v4();
        batches::record_spawn(&mut tx, batch_id, item_index, child_run_id).await?;
        tx.commit().await?;

        let graph = batch
            .child_graph
            .clone()
            .ok_or_else(|| EngineError::InvalidGraph("map batch missing cached child graph".into()))?;
        let item = batch
            .input_items
            .as_array()
            .and_then(|items| items.get(item_index as usize))
            .cloned()
            .unwrap_or(Value::Null);

        orchestrator::create_run_from_snapshot(
            pool,
            queue,
            batch.child_workflow_id,
            batch.child_version_id,
            graph,
            item,
            "map_item".to_owned(),
            true,
            Some(ParentLink {
                parent_run_id: batch.run_id,
                parent_node_id: batch.node_id.clone(),
                depth: batch.child_depth.unwrap_or(0),
                map_index: Some(item_index),
            }),
            Some(child_run_id),
        )
        .await?;
    }
}

/// Route a spawned child run's terminal result back to its batch: record
/// it, adjust the counters, and either short-circuit the batch (on a
/// `fail_fast` failure) or keep the fan-out moving.
pub async fn on_child_terminal(
    pool: &DbPool,
    queue: &dyn DispatchQueue,
    batch_id: Uuid,
    child_run: &RunRow,
    status: &str,
    output: Option<Value>,
    error: Option<String>,
) -> Result<(), EngineError> {
    let Some(placeholder) = batches::find_result_by_child_run(pool, batch_id, child_run.id).await? else {
        return Ok(()); // no matching spawn record — nothing we can do with this delivery
    };
    let failed = status != "completed";

    let mut tx = pool.begin().await?;
    let recorded = batches::complete_result(&mut tx, batch_id, placeholder.item_index, status, output, error.as_deref()).await?;
    if recorded.is_none() {
        return Ok(()); // duplicate delivery of the same child's terminal result
    }
    let batch = batches::record_item_terminal(&mut tx, batch_id, failed).await?;
    tx.commit().await?;

    if failed && batch.fail_fast && batch.status == "running" {
        abort_and_finish(pool, queue, &batch, "map batch aborted: fail_fast item failure").await
    } else {
        spawn_more(pool, queue, batch.id).await?;
        finalize_if_done(pool, queue, batch.id).await
    }
}

/// Resume the parent map node once every item has a terminal result.
/// A no-op unless the batch is still `running` and genuinely exhausted —
/// safe to call speculatively after every spawn and every item result.
pub async fn finalize_if_done(pool: &DbPool, queue: &dyn DispatchQueue, batch_id: Uuid) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    let batch = batches::lock_batch(&mut tx, batch_id).await?;
    if batch.status != "running" {
        return Ok(());
    }
    if batch.active_count != 0 || batch.current_index < batch.total_items {
        return Ok(());
    }
    batches::set_status(&mut tx, batch_id, "completed").await?;
    tx.commit().await?;

    let results = batches::list_results(pool, batch_id).await?;
    let results_json: Vec<Value> = results
        .iter()
        .map(|r| json!({ "item_index": r.item_index, "status": r.status, "output": r.output, "error": r.error_message }))
        .collect();

    // Partial item failures without `fail_fast` still complete the map
    // node itself — the per-item errors are visible in `results`, not
    // promoted into a distinct run-level status.
    orchestrator::resume(
        pool,
        queue,
        batch.run_id,
        &batch.node_id,
        Outcome::Completed { output: json!({ "status": "completed", "results": results_json }) },
    )
    .await
}

/// The Scheduler's map-timeout reaper calls this for any batch whose
/// `timeout_ms` has elapsed — aborts it exactly like a `fail_fast` item
/// failure, regardless of `fail_fast`'s own value.
pub async fn handle_timeout(pool: &DbPool, queue: &dyn DispatchQueue, batch_id: Uuid) -> Result<(), EngineError> {
    let batch = batches::get_batch(pool, batch_id).await?;
    if batch.status != "running" {
        return Err(EngineError::Conflict);
    }
    abort_and_finish(pool, queue, &batch, "map batch timed out").await
}

/// Exposed for the Scheduler, which polls for timed-out batches rather
/// than reacting to an event.
pub async fn list_timed_out(pool: &DbPool, now: DateTime<Utc>, limit: i64) -> Result<Vec<BatchOperationRow>, EngineError> {
    Ok(batches::list_timed_out(pool, now, limit).await?)
}

async fn abort_and_finish(pool: &DbPool, queue: &dyn DispatchQueue, batch: &BatchOperationRow, message: &str) -> Result<(), EngineError> {
    let mut tx = pool.begin().await?;
    let locked = batches::lock_batch(&mut tx, batch.id).await?;
    if locked.status != "running" {
        tx.commit().await?;
        return Ok(()); // already aborted or finished by a concurrent delivery
    }
    batches::set_status(&mut tx, batch.id, "failed").await?;
    tx.commit().await?;

    abort_remaining(pool, batch.id, batch.run_id, &batch.node_id).await?;

    orchestrator::resume(
        pool,
        queue,
        batch.run_id,
        &batch.node_id,
        Outcome::Failed { error_kind: ErrorKind::Permanent, message: message.to_owned(), retryable: false },
    )
    .await
}

/// Cancel every still-active child of this map node and record each as a
/// cancelled item result, so the conservation invariant
/// (`completed + failed + active + remaining = total`) holds once the
/// batch is marked terminal. Items never spawned stay counted as
/// `remaining` — `spawn_more` won't touch a non-`running` batch.
async fn abort_remaining(pool: &DbPool, batch_id: Uuid, run_id: Uuid, node_id: &str) -> Result<(), EngineError> {
    for sibling in runs::find_active_children_for_node(pool, run_id, node_id).await? {
        orchestrator::cancel(pool, sibling.id).await?;

        if let Some(placeholder) = batches::find_result_by_child_run(pool, batch_id, sibling.id).await? {
            let mut tx = pool.begin().await?;
            let recorded = batches::complete_result(&mut tx, batch_id, placeholder.item_index, "cancelled", None, Some("aborted by fail_fast or timeout")).await?;
            if recorded.is_some() {
                batches::record_item_terminal(&mut tx, batch_id, true).await?;
            }
            tx.commit().await?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use nodes::map::MapConfig;
    use serde_json::json;

    #[test]
    fn map_config_defaults_concurrency_to_one() {
        let raw = json!({ "child_workflow_id": 1, "input_items": [1, 2, 3] });
        let config: MapConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.concurrency_limit, 1);
        assert!(!config.fail_fast);
    }

    #[test]
    fn map_config_rejects_zero_concurrency_at_the_executor_not_here() {
        // MapConfig itself deserializes a 0 concurrency_limit fine — the
        // validation lives in MapExecutor::execute, which this module
        // never calls directly (it receives an already-resolved config).
        let raw = json!({ "child_workflow_id": 1, "input_items": [], "concurrency_limit": 0 });
        let config: MapConfig = serde_json::from_value(raw).unwrap();
        assert_eq!(config.concurrency_limit, 0);
    }
}
