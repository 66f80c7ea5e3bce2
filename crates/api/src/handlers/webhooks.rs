//! Webhook ingress (trigger runs from an inbound HTTP call) and webhook
//! resume (satisfy a suspended `webhook_wait` node via its token). See
//! §6: resume returns 200 on success, 404 for an unknown token, 410 once
//! the token has already been consumed or has expired.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};

use db::repository::{suspensions, versions, workflows as wf_repo};
use engine::orchestrator::{self, CreateRunRequest};
use engine::Graph;
use nodes::Outcome;

use super::AppState;
use crate::engine_error_status;

pub async fn handle_webhook(
    Path(path): Path<String>,
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<(StatusCode, Json<serde_json::Value>), StatusCode> {
    let workflow_id = find_workflow_by_webhook_path(&state, &path).await?;

    let req = CreateRunRequest {
        workflow_id,
        version_id: None,
        input: payload,
        trigger: "webhook".to_owned(),
        parent_link: None,
    };

    let run_id = orchestrator::create_run(&state.pool, state.queue.as_ref(), req)
        .await
        .map_err(|e| engine_error_status(&e))?;

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({ "run_id": run_id }))))
}

/// Scan every workflow's currently active version for a matching
/// `webhook_path` — a draft's unpublished edits to that path don't take
/// effect until published, same as every other part of the graph.
async fn find_workflow_by_webhook_path(state: &AppState, path: &str) -> Result<i64, StatusCode> {
    let all = wf_repo::list_workflows(&state.pool).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    for workflow in all {
        let Some(active_version_id) = workflow.active_version_id else { continue };
        let version = versions::get_version(&state.pool, active_version_id)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let graph: Graph = serde_json::from_value(version.graph).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        if graph.webhook_path.as_deref() == Some(path) {
            return Ok(workflow.id);
        }
    }

    Err(StatusCode::NOT_FOUND)
}

pub async fn resume(Path(token): Path<String>, State(state): State<AppState>, Json(payload): Json<Value>) -> Result<StatusCode, StatusCode> {
    let existing = suspensions::get(&state.pool, &token).await.map_err(|e| {
        if matches!(e, db::DbError::NotFound) {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    if existing.consumed || existing.expires_at < chrono::Utc::now() {
        return Err(StatusCode::GONE);
    }

    let Some(consumed) = suspensions::consume(&state.pool, &token).await.map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)? else {
        return Err(StatusCode::GONE); // raced with another resume or the webhook-timeout reaper
    };

    orchestrator::resume(
        &state.pool,
        state.queue.as_ref(),
        consumed.run_id,
        &consumed.node_id,
        Outcome::Completed { output: json!({ "webhook_payload": payload }) },
    )
    .await
    .map(|_| StatusCode::OK)
    .map_err(|e| engine_error_status(&e))
}
