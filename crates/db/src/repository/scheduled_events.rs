//! Time-based events the Scheduler promotes into dispatch-queue tasks.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{models::ScheduledEventRow, DbError, DbPool};

/// Insert a delay wakeup or webhook timeout scheduled event.
pub async fn schedule(
    pool: &DbPool,
    kind: &str,
    due_at: DateTime<Utc>,
    target_run_id: Option<Uuid>,
    target_node_id: Option<&str>,
    target_workflow_id: Option<i64>,
    payload: serde_json::Value,
) -> Result<ScheduledEventRow, DbError> {
    let id = Uuid::new_v4();
    let row = sqlx::query_as!(
        ScheduledEventRow,
        r#"
        INSERT INTO scheduled_events (id, kind, due_at, target_run_id, target_node_id, target_workflow_id, payload)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, kind, due_at, target_run_id, target_node_id, target_workflow_id,
                  payload, claimed_at, consumed
        "#,
        id,
        kind,
        due_at,
        target_run_id,
        target_node_id,
        target_workflow_id,
        payload,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Claim up to `limit` due, unconsumed events of `kind` using
/// `FOR UPDATE SKIP LOCKED`, marking them consumed in the same
/// transaction. Safe for N concurrent scheduler instances.
pub async fn claim_due(
    pool: &DbPool,
    kind: &str,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<ScheduledEventRow>, DbError> {
    let mut tx = pool.begin().await?;

    let rows = sqlx::query_as!(
        ScheduledEventRow,
        r#"
        SELECT id, kind, due_at, target_run_id, target_node_id, target_workflow_id,
               payload, claimed_at, consumed
        FROM scheduled_events
        WHERE kind = $1 AND due_at <= $2 AND NOT consumed
        ORDER BY due_at ASC
        LIMIT $3
        FOR UPDATE SKIP LOCKED
        "#,
        kind,
        now,
        limit,
    )
    .fetch_all(&mut *tx)
    .await?;

    let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
    sqlx::query!(
        "UPDATE scheduled_events SET consumed = true, claimed_at = now() WHERE id = ANY($1)",
        &ids,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(rows)
}
