//! Workflow version repository — immutable snapshots created on publish.

use uuid::Uuid;

use crate::{models::WorkflowVersionRow, repository::workflows, DbError, DbPool};

/// Publish a new version of `workflow_id`: allocate the next
/// `version_number`, copy `graph` (+ optional schemas) into an immutable
/// row, and flip the workflow's `active_version_id` to it — all in one
/// transaction so a crash never leaves a workflow pointing at a
/// half-written version.
pub async fn publish(
    pool: &DbPool,
    workflow_id: i64,
    graph: serde_json::Value,
    input_schema: Option<serde_json::Value>,
    output_schema: Option<serde_json::Value>,
    change_summary: Option<&str>,
    created_by: Option<&str>,
) -> Result<WorkflowVersionRow, DbError> {
    let mut tx = pool.begin().await?;

    let next_number: i32 = sqlx::query_scalar!(
        r#"
        SELECT COALESCE(MAX(version_number), 0) + 1 as "next!"
        FROM workflow_versions WHERE workflow_id = $1
        "#,
        workflow_id,
    )
    .fetch_one(&mut *tx)
    .await?;

    let id = Uuid::new_v4();
    let row = sqlx::query_as!(
        WorkflowVersionRow,
        r#"
        INSERT INTO workflow_versions
            (id, workflow_id, version_number, graph, input_schema, output_schema, change_summary, created_by)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING id, workflow_id, version_number, graph, input_schema, output_schema,
                  change_summary, created_by, created_at
        "#,
        id,
        workflow_id,
        next_number,
        graph,
        input_schema,
        output_schema,
        change_summary,
        created_by,
    )
    .fetch_one(&mut *tx)
    .await?;

    workflows::set_active_version(&mut tx, workflow_id, id).await?;

    tx.commit().await?;
    Ok(row)
}

/// Fetch a specific version by id.
pub async fn get_version(pool: &DbPool, id: Uuid) -> Result<WorkflowVersionRow, DbError> {
    let row = sqlx::query_as!(
        WorkflowVersionRow,
        r#"
        SELECT id, workflow_id, version_number, graph, input_schema, output_schema,
               change_summary, created_by, created_at
        FROM workflow_versions WHERE id = $1
        "#,
        id,
    )
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)?;

    Ok(row)
}

/// List every version of a workflow, newest first.
pub async fn list_versions(
    pool: &DbPool,
    workflow_id: i64,
) -> Result<Vec<WorkflowVersionRow>, DbError> {
    let rows = sqlx::query_as!(
        WorkflowVersionRow,
        r#"
        SELECT id, workflow_id, version_number, graph, input_schema, output_schema,
               change_summary, created_by, created_at
        FROM workflow_versions
        WHERE workflow_id = $1
        ORDER BY version_number DESC
        "#,
        workflow_id,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
