//! Workflow CRUD and scheduling metadata.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::{models::WorkflowRow, DbError};

/// Insert a new workflow with an empty draft graph.
pub async fn create_workflow(
    pool: &PgPool,
    name: &str,
    graph: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        INSERT INTO workflows (name, graph)
        VALUES ($1, $2)
        RETURNING id, name, graph, active_version_id, share_version,
                  schedule_enabled, schedule_cron, schedule_timezone,
                  schedule_next_run, overlap_mode, updated_at
        "#,
        name,
        graph,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetch a single workflow by its primary key.
pub async fn get_workflow(pool: &PgPool, id: i64) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        SELECT id, name, graph, active_version_id, share_version,
               schedule_enabled, schedule_cron, schedule_timezone,
               schedule_next_run, overlap_mode, updated_at
        FROM workflows WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Return all workflows, newest first.
pub async fn list_workflows(pool: &PgPool) -> Result<Vec<WorkflowRow>, DbError> {
    let rows = sqlx::query_as!(
        WorkflowRow,
        r#"
        SELECT id, name, graph, active_version_id, share_version,
               schedule_enabled, schedule_cron, schedule_timezone,
               schedule_next_run, overlap_mode, updated_at
        FROM workflows ORDER BY id DESC
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Overwrite the editor's draft graph. Never touches `active_version_id` —
/// publishing in-flight runs must not be affected by draft saves.
pub async fn update_graph(
    pool: &PgPool,
    id: i64,
    graph: serde_json::Value,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        UPDATE workflows SET graph = $1, updated_at = now()
        WHERE id = $2
        RETURNING id, name, graph, active_version_id, share_version,
                  schedule_enabled, schedule_cron, schedule_timezone,
                  schedule_next_run, overlap_mode, updated_at
        "#,
        graph,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Point `active_version_id` at a freshly created version. Called from
/// within the same transaction that inserts the `WorkflowVersion` row.
pub async fn set_active_version(
    tx: &mut sqlx::PgConnection,
    id: i64,
    version_id: uuid::Uuid,
) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE workflows SET active_version_id = $1, updated_at = now() WHERE id = $2",
        version_id,
        id,
    )
    .execute(tx)
    .await?;

    Ok(())
}

/// Configure (or disable) the cron schedule for a workflow.
#[allow(clippy::too_many_arguments)]
pub async fn set_schedule(
    pool: &PgPool,
    id: i64,
    enabled: bool,
    cron_expr: Option<&str>,
    timezone: Option<&str>,
    overlap_mode: &str,
    next_run: Option<DateTime<Utc>>,
) -> Result<WorkflowRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowRow,
        r#"
        UPDATE workflows
        SET schedule_enabled = $1,
            schedule_cron = $2,
            schedule_timezone = $3,
            overlap_mode = $4,
            schedule_next_run = $5,
            updated_at = now()
        WHERE id = $6
        RETURNING id, name, graph, active_version_id, share_version,
                  schedule_enabled, schedule_cron, schedule_timezone,
                  schedule_next_run, overlap_mode, updated_at
        "#,
        enabled,
        cron_expr,
        timezone,
        overlap_mode,
        next_run,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Recompute `schedule_next_run` after a cron fire was promoted.
pub async fn update_schedule_next_run(
    pool: &PgPool,
    id: i64,
    next_run: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE workflows SET schedule_next_run = $1 WHERE id = $2",
        next_run,
        id,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Claim due cron-enabled workflows for this scheduler tick. Uses
/// `FOR UPDATE SKIP LOCKED` so multiple scheduler instances can coexist
/// without double-firing the same workflow.
pub async fn claim_due_cron(
    pool: &PgPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<WorkflowRow>, DbError> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as!(
        WorkflowRow,
        r#"
        SELECT id, name, graph, active_version_id, share_version,
               schedule_enabled, schedule_cron, schedule_timezone,
               schedule_next_run, overlap_mode, updated_at
        FROM workflows
        WHERE schedule_enabled AND schedule_next_run <= $1
        ORDER BY schedule_next_run ASC
        LIMIT $2
        FOR UPDATE SKIP LOCKED
        "#,
        now,
        limit,
    )
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(rows)
}

/// Permanently delete a workflow (cascades to versions and runs).
pub async fn delete_workflow(pool: &PgPool, id: i64) -> Result<(), DbError> {
    let result = sqlx::query!("DELETE FROM workflows WHERE id = $1", id)
        .execute(pool)
        .await?;

    if result.rows_affected() == 0 {
        return Err(DbError::NotFound);
    }

    Ok(())
}

/// Count non-terminal cron-triggered runs for a workflow — used by the
/// Scheduler's `overlap_mode` decision (`skip` / `queue_one`).
pub async fn count_active_cron_runs(pool: &PgPool, workflow_id: i64) -> Result<i64, DbError> {
    let count = sqlx::query_scalar!(
        r#"
        SELECT count(*) as "count!"
        FROM workflow_runs
        WHERE workflow_id = $1 AND trigger = 'cron'
          AND status IN ('pending', 'running')
        "#,
        workflow_id,
    )
    .fetch_one(pool)
    .await?;

    Ok(count)
}
