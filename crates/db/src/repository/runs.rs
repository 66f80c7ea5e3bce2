//! Workflow run repository.

use chrono::Utc;
use uuid::Uuid;

use crate::{models::RunRow, DbError, DbPool};

/// Parameters for creating a new run. Bundled into a struct because the
/// Run API (§4.1 of the spec) always supplies every field at once.
pub struct NewRun {
    pub id: Uuid,
    pub workflow_id: i64,
    pub workflow_version_id: Option<Uuid>,
    pub snapshot_graph: serde_json::Value,
    pub trigger: String,
    pub input_data: serde_json::Value,
    pub pinned: bool,
    pub parent_run_id: Option<Uuid>,
    pub parent_node_id: Option<String>,
    pub depth: i32,
    pub map_index: Option<i32>,
}

/// Insert a new run row in `pending` status. Callers are expected to do
/// this inside the same transaction that inserts `RUN_CREATED` and the
/// initial frontier's `NODE_SCHEDULED` events (see `engine::orchestrator`).
pub async fn create_run(
    tx: &mut sqlx::PgConnection,
    new_run: &NewRun,
) -> Result<RunRow, DbError> {
    let row = sqlx::query_as!(
        RunRow,
        r#"
        INSERT INTO workflow_runs
            (id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
             input_data, pinned, parent_run_id, parent_node_id, depth, map_index)
        VALUES ($1, $2, $3, $4, 'pending', $5, $6, $7, $8, $9, $10, $11)
        RETURNING id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
                  input_data, output_data, error, pinned, started_at, completed_at,
                  parent_run_id, parent_node_id, depth, map_index
        "#,
        new_run.id,
        new_run.workflow_id,
        new_run.workflow_version_id,
        new_run.snapshot_graph,
        new_run.trigger,
        new_run.input_data,
        new_run.pinned,
        new_run.parent_run_id,
        new_run.parent_node_id,
        new_run.depth,
        new_run.map_index,
    )
    .fetch_one(tx)
    .await?;

    Ok(row)
}

/// Fetch a run by id.
pub async fn get_run(pool: &DbPool, id: Uuid) -> Result<RunRow, DbError> {
    let row = sqlx::query_as!(
        RunRow,
        r#"
        SELECT id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
               input_data, output_data, error, pinned, started_at, completed_at,
               parent_run_id, parent_node_id, depth, map_index
        FROM workflow_runs WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Set the run's derived `status` (first `NODE_STARTED` moves it to
/// `running`; its own terminal event moves it to a terminal status).
pub async fn set_status(pool: &DbPool, id: Uuid, status: &str) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE workflow_runs SET status = $1 WHERE id = $2",
        status,
        id,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Same as [`set_status`], against an open transaction — used right after
/// [`create_run`] flips a freshly created run to `running`.
pub async fn set_status_tx(tx: &mut sqlx::PgConnection, id: Uuid, status: &str) -> Result<(), DbError> {
    sqlx::query!(
        "UPDATE workflow_runs SET status = $1 WHERE id = $2",
        status,
        id,
    )
    .execute(tx)
    .await?;

    Ok(())
}

/// Lock a run row for the duration of successor computation, so two
/// workers racing to complete sibling nodes can't both decide the same
/// downstream join is "ready" and double-schedule it.
pub async fn lock_run(tx: &mut sqlx::PgConnection, id: Uuid) -> Result<RunRow, DbError> {
    let row = sqlx::query_as!(
        RunRow,
        r#"
        SELECT id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
               input_data, output_data, error, pinned, started_at, completed_at,
               parent_run_id, parent_node_id, depth, map_index
        FROM workflow_runs WHERE id = $1
        FOR UPDATE
        "#,
        id,
    )
    .fetch_optional(tx)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Non-terminal children of a run — used to cascade cancellation.
pub async fn find_active_children(pool: &DbPool, parent_run_id: Uuid) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as!(
        RunRow,
        r#"
        SELECT id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
               input_data, output_data, error, pinned, started_at, completed_at,
               parent_run_id, parent_node_id, depth, map_index
        FROM workflow_runs
        WHERE parent_run_id = $1 AND status IN ('pending', 'running')
        "#,
        parent_run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Non-terminal children spawned by one specific node (a map batch's
/// children share `parent_run_id` with every other suspended node in the
/// same run, so cancelling "this map's children" needs `parent_node_id`
/// too).
pub async fn find_active_children_for_node(
    pool: &DbPool,
    parent_run_id: Uuid,
    parent_node_id: &str,
) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as!(
        RunRow,
        r#"
        SELECT id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
               input_data, output_data, error, pinned, started_at, completed_at,
               parent_run_id, parent_node_id, depth, map_index
        FROM workflow_runs
        WHERE parent_run_id = $1 AND parent_node_id = $2 AND status IN ('pending', 'running')
        "#,
        parent_run_id,
        parent_node_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Mark a run terminal (completed / failed / cancelled) with its final
/// output and/or error.
pub async fn finalize(
    pool: &DbPool,
    id: Uuid,
    status: &str,
    output_data: Option<serde_json::Value>,
    error: Option<&str>,
) -> Result<(), DbError> {
    sqlx::query!(
        r#"
        UPDATE workflow_runs
        SET status = $1, output_data = $2, error = $3, completed_at = $4
        WHERE id = $5
        "#,
        status,
        output_data,
        error,
        Utc::now(),
        id,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Runs that have been `running` longer than `max_wall_time` with no
/// terminal status yet — candidates for the Scheduler's reaper.
pub async fn find_stale_running(
    pool: &DbPool,
    older_than: chrono::DateTime<Utc>,
    limit: i64,
) -> Result<Vec<RunRow>, DbError> {
    let rows = sqlx::query_as!(
        RunRow,
        r#"
        SELECT id, workflow_id, workflow_version_id, snapshot_graph, status, trigger,
               input_data, output_data, error, pinned, started_at, completed_at,
               parent_run_id, parent_node_id, depth, map_index
        FROM workflow_runs
        WHERE status = 'running' AND started_at <= $1
        ORDER BY started_at ASC
        LIMIT $2
        "#,
        older_than,
        limit,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
