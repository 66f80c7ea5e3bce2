//! The append-only run-event log — the ground truth of run state.

use uuid::Uuid;

use crate::{models::RunEventRow, DbError, DbPool};

/// Append a non-terminal event (`RUN_CREATED`, `NODE_SCHEDULED`,
/// `NODE_STARTED`, `NODE_SUSPENDED`, `NODE_RESUMED`, `NODE_RETRIED`, the
/// `RUN_*` terminal markers). These are not subject to the idempotency
/// unique index, so a plain insert suffices.
pub async fn append(
    pool: &DbPool,
    run_id: Uuid,
    node_id: Option<&str>,
    event_type: &str,
    payload: serde_json::Value,
    retry_count: Option<i32>,
) -> Result<RunEventRow, DbError> {
    let row = sqlx::query_as!(
        RunEventRow,
        r#"
        INSERT INTO run_events (run_id, node_id, event_type, payload, retry_count)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, run_id, node_id, event_type, payload, retry_count, created_at
        "#,
        run_id,
        node_id,
        event_type,
        payload,
        retry_count,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Same as [`append`], but executed against an open transaction — used when
/// the event insert must commit atomically with other writes (run creation,
/// successor scheduling).
pub async fn append_tx(
    tx: &mut sqlx::PgConnection,
    run_id: Uuid,
    node_id: Option<&str>,
    event_type: &str,
    payload: serde_json::Value,
    retry_count: Option<i32>,
) -> Result<RunEventRow, DbError> {
    let row = sqlx::query_as!(
        RunEventRow,
        r#"
        INSERT INTO run_events (run_id, node_id, event_type, payload, retry_count)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id, run_id, node_id, event_type, payload, retry_count, created_at
        "#,
        run_id,
        node_id,
        event_type,
        payload,
        retry_count,
    )
    .fetch_one(tx)
    .await?;

    Ok(row)
}

/// Append a `NODE_COMPLETED`/`NODE_FAILED` terminal event, respecting the
/// `(run_id, node_id, retry_count, event_type)` idempotency key.
///
/// Returns `Ok(Some(row))` on first delivery, `Ok(None)` when this exact
/// terminal event was already recorded (duplicate delivery — the caller
/// must drop it silently and must not re-run successor scheduling).
pub async fn append_terminal(
    pool: &DbPool,
    run_id: Uuid,
    node_id: &str,
    event_type: &str,
    payload: serde_json::Value,
    retry_count: i32,
) -> Result<Option<RunEventRow>, DbError> {
    let result = sqlx::query_as!(
        RunEventRow,
        r#"
        INSERT INTO run_events (run_id, node_id, event_type, payload, retry_count)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (run_id, node_id, retry_count, event_type)
            WHERE event_type IN ('NODE_COMPLETED', 'NODE_FAILED')
            DO NOTHING
        RETURNING id, run_id, node_id, event_type, payload, retry_count, created_at
        "#,
        run_id,
        node_id,
        event_type,
        payload,
        retry_count,
    )
    .fetch_optional(pool)
    .await?;

    Ok(result)
}

/// Fold the entire event log for a run, oldest first — the canonical way
/// to reconstruct derived state (run status, per-node results).
pub async fn list_for_run(pool: &DbPool, run_id: Uuid) -> Result<Vec<RunEventRow>, DbError> {
    let rows = sqlx::query_as!(
        RunEventRow,
        r#"
        SELECT id, run_id, node_id, event_type, payload, retry_count, created_at
        FROM run_events
        WHERE run_id = $1
        ORDER BY id ASC
        "#,
        run_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
