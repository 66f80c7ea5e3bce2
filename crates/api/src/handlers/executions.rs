//! Run trigger (§4.1's Run API), status lookup, and cancellation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use db::models::RunRow;
use engine::orchestrator::{self, CreateRunRequest};

use super::AppState;
use crate::engine_error_status;

#[derive(Deserialize)]
pub struct ExecuteDto {
    #[serde(default)]
    pub input: Value,
    /// Pin this run to a specific published version instead of whichever
    /// one is currently active.
    #[serde(default)]
    pub version_id: Option<Uuid>,
}

#[derive(serde::Serialize)]
pub struct RunIdResponse {
    pub run_id: Uuid,
}

pub async fn execute(
    Path(workflow_id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<ExecuteDto>,
) -> Result<(StatusCode, Json<RunIdResponse>), StatusCode> {
    let req = CreateRunRequest {
        workflow_id,
        version_id: payload.version_id,
        input: payload.input,
        trigger: "api".to_owned(),
        parent_link: None,
    };

    orchestrator::create_run(&state.pool, state.queue.as_ref(), req)
        .await
        .map(|run_id| (StatusCode::ACCEPTED, Json(RunIdResponse { run_id })))
        .map_err(|e| engine_error_status(&e))
}

pub async fn get_run(Path(run_id): Path<Uuid>, State(state): State<AppState>) -> Result<Json<RunRow>, StatusCode> {
    db::repository::runs::get_run(&state.pool, run_id)
        .await
        .map(Json)
        .map_err(|e| if matches!(e, db::DbError::NotFound) { StatusCode::NOT_FOUND } else { StatusCode::INTERNAL_SERVER_ERROR })
}

pub async fn cancel(Path(run_id): Path<Uuid>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    orchestrator::cancel(&state.pool, run_id)
        .await
        .map(|_| StatusCode::ACCEPTED)
        .map_err(|e| engine_error_status(&e))
}
