//! Map node batch bookkeeping (`batch_operations` / `batch_results`).
//!
//! `batch_operations` is the hot contention point for a running map node:
//! its counters are updated under `SELECT … FOR UPDATE` on the row itself.
//! Per-item results go to the separate, append-only `batch_results` table
//! to keep the counter row small and avoid lock contention.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{models::BatchOperationRow, models::BatchResultRow, DbError, DbPool};

/// Parameters for creating a map node's batch row. Bundled because every
/// field is immutable configuration fixed at map-node dispatch time.
pub struct NewBatch {
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
}

pub async fn create_batch(pool: &DbPool, new_batch: &NewBatch) -> Result<BatchOperationRow, DbError> {
    let row = sqlx::query_as!(
        BatchOperationRow,
        r#"
        INSERT INTO batch_operations
            (id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
             child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        RETURNING id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
                  child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
                  current_index, active_count, completed_count, failed_count, status,
                  created_at, completed_at
        "#,
        new_batch.id,
        new_batch.run_id,
        new_batch.node_id,
        new_batch.total_items,
        new_batch.concurrency_limit,
        new_batch.fail_fast,
        new_batch.input_items,
        new_batch.child_workflow_id,
        new_batch.child_version_id,
        new_batch.child_graph,
        new_batch.child_depth,
        new_batch.timeout_ms,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Lock and fetch a batch row for mutation. Must be called inside an open
/// transaction; the caller commits once the spawn/terminal logic finishes.
pub async fn lock_batch(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
) -> Result<BatchOperationRow, DbError> {
    let row = sqlx::query_as!(
        BatchOperationRow,
        r#"
        SELECT id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
               child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
               current_index, active_count, completed_count, failed_count, status,
               created_at, completed_at
        FROM batch_operations WHERE id = $1
        FOR UPDATE
        "#,
        batch_id,
    )
    .fetch_optional(tx)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

pub async fn get_batch(pool: &DbPool, batch_id: Uuid) -> Result<BatchOperationRow, DbError> {
    let row = sqlx::query_as!(
        BatchOperationRow,
        r#"
        SELECT id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
               child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
               current_index, active_count, completed_count, failed_count, status,
               created_at, completed_at
        FROM batch_operations WHERE id = $1
        "#,
        batch_id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Atomically advance the cursor by one item: increments `active_count`
/// and `current_index`, returning the `item_index` just claimed. Call
/// once per spawned child, while holding the row lock from [`lock_batch`].
pub async fn claim_next_item(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
) -> Result<i32, DbError> {
    let item_index = sqlx::query_scalar!(
        r#"
        UPDATE batch_operations
        SET active_count = active_count + 1, current_index = current_index + 1
        WHERE id = $1
        RETURNING current_index - 1 as "item_index!"
        "#,
        batch_id,
    )
    .fetch_one(tx)
    .await?;

    Ok(item_index)
}

/// Record that a child has been spawned for `item_index`, before its
/// outcome is known. This is what lets [`find_result_by_child_run`] map a
/// terminating child run back to its item — the batch doesn't otherwise
/// carry any link from `child_run_id` to `item_index`.
pub async fn record_spawn(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
    item_index: i32,
    child_run_id: Uuid,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        INSERT INTO batch_results (batch_id, item_index, child_run_id, status)
        VALUES ($1, $2, $3, 'running')
        ON CONFLICT (batch_id, item_index) DO NOTHING
        "#,
        batch_id,
        item_index,
        child_run_id,
    )
    .execute(tx)
    .await?;

    Ok(())
}

/// Find the placeholder row a previous [`record_spawn`] left for this
/// child run, so its terminal result can be recorded against the right
/// `item_index` without the child needing to know it.
pub async fn find_result_by_child_run(
    pool: &DbPool,
    batch_id: Uuid,
    child_run_id: Uuid,
) -> Result<Option<BatchResultRow>, DbError> {
    let row = sqlx::query_as!(
        BatchResultRow,
        r#"
        SELECT batch_id, item_index, child_run_id, status, output, error_message, created_at
        FROM batch_results
        WHERE batch_id = $1 AND child_run_id = $2
        "#,
        batch_id,
        child_run_id,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Record a child run's terminal result against its `item_index`. Only
/// transitions a row still `running` — the guard (rather than the
/// composite primary key alone) is what guarantees at-most-once recording
/// under duplicate resume delivery, since [`record_spawn`] already created
/// the row.
pub async fn complete_result(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
    item_index: i32,
    status: &str,
    output: Option<serde_json::Value>,
    error_message: Option<&str>,
) -> Result<Option<BatchResultRow>, DbError> {
    let row = sqlx::query_as!(
        BatchResultRow,
        r#"
        UPDATE batch_results
        SET status = $3, output = $4, error_message = $5, created_at = now()
        WHERE batch_id = $1 AND item_index = $2 AND status = 'running'
        RETURNING batch_id, item_index, child_run_id, status, output, error_message, created_at
        "#,
        batch_id,
        item_index,
        status,
        output,
        error_message,
    )
    .fetch_optional(tx)
    .await?;

    Ok(row)
}

/// Adjust the batch counters after a result lands: one fewer active child,
/// one more completed or failed.
pub async fn record_item_terminal(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
    failed: bool,
) -> Result<BatchOperationRow, DbError> {
    let row = if failed {
        sqlx::query_as!(
            BatchOperationRow,
            r#"
            UPDATE batch_operations
            SET active_count = active_count - 1, failed_count = failed_count + 1
            WHERE id = $1
            RETURNING id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
                      child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
                      current_index, active_count, completed_count, failed_count, status,
                      created_at, completed_at
            "#,
            batch_id,
        )
        .fetch_one(tx)
        .await?
    } else {
        sqlx::query_as!(
            BatchOperationRow,
            r#"
            UPDATE batch_operations
            SET active_count = active_count - 1, completed_count = completed_count + 1
            WHERE id = $1
            RETURNING id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
                      child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
                      current_index, active_count, completed_count, failed_count, status,
                      created_at, completed_at
            "#,
            batch_id,
        )
        .fetch_one(tx)
        .await?
    };

    Ok(row)
}

/// Set the batch's terminal status (`completed` / `failed` / `cancelled` /
/// `timed_out`).
pub async fn set_status(
    tx: &mut sqlx::PgConnection,
    batch_id: Uuid,
    status: &str,
) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE batch_operations SET status = $1, completed_at = now() WHERE id = $2",
        status,
        batch_id,
    )
    .execute(tx)
    .await?;

    Ok(())
}

/// Batches still accepting terminal results for a run — used to cancel
/// outstanding map work when the parent run is cancelled or fails.
pub async fn list_open_for_run(pool: &DbPool, run_id: Uuid) -> Result<Vec<BatchOperationRow>, DbError> {
    let rows = sqlx::query_as!(
        BatchOperationRow,
        r#"
        SELECT id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
               child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
               current_index, active_count, completed_count, failed_count, status,
               created_at, completed_at
        FROM batch_operations
        WHERE run_id = $1 AND status = 'running'
        "#,
        run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Find the batch backing a given map node in a given run — used when a
/// spawned child run terminates, to route its result back to the right
/// batch without the child needing to know its own batch id.
pub async fn find_by_run_node(
    pool: &DbPool,
    run_id: Uuid,
    node_id: &str,
) -> Result<Option<BatchOperationRow>, DbError> {
    let row = sqlx::query_as!(
        BatchOperationRow,
        r#"
        SELECT id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
               child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
               current_index, active_count, completed_count, failed_count, status,
               created_at, completed_at
        FROM batch_operations
        WHERE run_id = $1 AND node_id = $2
        "#,
        run_id,
        node_id,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Results ordered by `item_index`, regardless of completion order — the
/// shape the parent map node's `Completed` outcome is built from.
pub async fn list_results(pool: &DbPool, batch_id: Uuid) -> Result<Vec<BatchResultRow>, DbError> {
    let rows = sqlx::query_as!(
        BatchResultRow,
        r#"
        SELECT batch_id, item_index, child_run_id, status, output, error_message, created_at
        FROM batch_results
        WHERE batch_id = $1
        ORDER BY item_index ASC
        "#,
        batch_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Batches still `running` whose `timeout_ms` has elapsed since creation —
/// feeds the Scheduler's map-timeout reaper.
pub async fn list_timed_out(
    pool: &DbPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<BatchOperationRow>, DbError> {
    let rows = sqlx::query_as!(
        BatchOperationRow,
        r#"
        SELECT id, run_id, node_id, total_items, concurrency_limit, fail_fast, input_items,
               child_workflow_id, child_version_id, child_graph, child_depth, timeout_ms,
               current_index, active_count, completed_count, failed_count, status,
               created_at, completed_at
        FROM batch_operations
        WHERE status = 'running' AND timeout_ms IS NOT NULL
          AND created_at + (timeout_ms * interval '1 millisecond') <= $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
        now,
        limit,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
