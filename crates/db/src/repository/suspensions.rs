//! Webhook-wait suspension tokens.

use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use uuid::Uuid;

use crate::{models::SuspensionTokenRow, DbError, DbPool};

/// Mint a new opaque, single-use token for a suspended webhook-wait node.
pub async fn create(
    pool: &DbPool,
    run_id: Uuid,
    node_id: &str,
    expires_at: DateTime<Utc>,
) -> Result<SuspensionTokenRow, DbError> {
    let token: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();

    let row = sqlx::query_as!(
        SuspensionTokenRow,
        r#"
        INSERT INTO suspension_tokens (token, run_id, node_id, expires_at)
        VALUES ($1, $2, $3, $4)
        RETURNING token, run_id, node_id, expires_at, consumed
        "#,
        token,
        run_id,
        node_id,
        expires_at,
    )
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Look up a token without consuming it — used to distinguish "unknown"
/// (404) from "expired" (410) before attempting a resume.
pub async fn get(pool: &DbPool, token: &str) -> Result<SuspensionTokenRow, DbError> {
    let row = sqlx::query_as!(
        SuspensionTokenRow,
        r#"SELECT token, run_id, node_id, expires_at, consumed FROM suspension_tokens WHERE token = $1"#,
        token,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// Atomically mark a token consumed. Returns `Ok(None)` if it was already
/// consumed (resume is a no-op) or didn't exist.
pub async fn consume(pool: &DbPool, token: &str) -> Result<Option<SuspensionTokenRow>, DbError> {
    let row = sqlx::query_as!(
        SuspensionTokenRow,
        r#"
        UPDATE suspension_tokens SET consumed = true
        WHERE token = $1 AND NOT consumed
        RETURNING token, run_id, node_id, expires_at, consumed
        "#,
        token,
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Expired, unconsumed tokens — the Scheduler's webhook-timeout reaper feed.
pub async fn find_expired(
    pool: &DbPool,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<SuspensionTokenRow>, DbError> {
    let rows = sqlx::query_as!(
        SuspensionTokenRow,
        r#"
        SELECT token, run_id, node_id, expires_at, consumed
        FROM suspension_tokens
        WHERE NOT consumed AND expires_at <= $1
        ORDER BY expires_at ASC
        LIMIT $2
        "#,
        now,
        limit,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
