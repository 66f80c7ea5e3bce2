//! Workflow CRUD, publishing, scheduling, and the export/import round trip.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use db::models::WorkflowRow;
use db::repository::workflows as wf_repo;
use engine::export::{self, ExportedWorkflow};
use engine::version::{self, PublishRequest};
use engine::Graph;

use super::AppState;
use crate::engine_error_status;

#[derive(Deserialize)]
pub struct CreateWorkflowDto {
    pub name: String,
    #[serde(default)]
    pub graph: Graph,
}

#[derive(Deserialize)]
pub struct UpdateGraphDto {
    pub graph: Graph,
}

#[derive(Deserialize)]
pub struct PublishDto {
    pub graph: Graph,
    #[serde(default)]
    pub input_schema: Option<Value>,
    #[serde(default)]
    pub output_schema: Option<Value>,
    #[serde(default)]
    pub change_summary: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Deserialize)]
pub struct SetScheduleDto {
    pub enabled: bool,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default = "default_overlap_mode")]
    pub overlap_mode: String,
}

fn default_overlap_mode() -> String {
    "skip".to_owned()
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<WorkflowRow>>, StatusCode> {
    wf_repo::list_workflows(&state.pool).await.map(Json).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn get(Path(id): Path<i64>, State(state): State<AppState>) -> Result<Json<WorkflowRow>, StatusCode> {
    wf_repo::get_workflow(&state.pool, id).await.map(Json).map_err(db_error_status)
}

pub async fn create(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowDto>,
) -> Result<(StatusCode, Json<WorkflowRow>), StatusCode> {
    let graph_value = serde_json::to_value(&payload.graph).map_err(|_| StatusCode::BAD_REQUEST)?;
    wf_repo::create_workflow(&state.pool, &payload.name, graph_value)
        .await
        .map(|row| (StatusCode::CREATED, Json(row)))
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

pub async fn update_graph(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<UpdateGraphDto>,
) -> Result<Json<WorkflowRow>, StatusCode> {
    let graph_value = serde_json::to_value(&payload.graph).map_err(|_| StatusCode::BAD_REQUEST)?;
    wf_repo::update_graph(&state.pool, id, graph_value).await.map(Json).map_err(db_error_status)
}

pub async fn delete(Path(id): Path<i64>, State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    wf_repo::delete_workflow(&state.pool, id).await.map(|_| StatusCode::NO_CONTENT).map_err(db_error_status)
}

/// Validate and freeze the submitted graph as the workflow's new active
/// version. Runs already in flight keep executing their own
/// `snapshot_graph`, untouched by this.
pub async fn publish(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<PublishDto>,
) -> Result<Json<db::models::WorkflowVersionRow>, StatusCode> {
    let req = PublishRequest {
        workflow_id: id,
        graph: payload.graph,
        input_schema: payload.input_schema,
        output_schema: payload.output_schema,
        change_summary: payload.change_summary,
        created_by: payload.created_by,
    };

    version::publish(&state.pool, req).await.map(Json).map_err(|e| engine_error_status(&e))
}

/// Enable or disable a workflow's cron schedule. Enabling computes the
/// first `schedule_next_run` eagerly so the Scheduler picks it up on its
/// very next tick rather than waiting a full period.
pub async fn set_schedule(
    Path(id): Path<i64>,
    State(state): State<AppState>,
    Json(payload): Json<SetScheduleDto>,
) -> Result<Json<WorkflowRow>, StatusCode> {
    let next_run = if payload.enabled {
        let (Some(expr), Some(tz)) = (payload.cron_expression.as_deref(), payload.timezone.as_deref()) else {
            return Err(StatusCode::BAD_REQUEST);
        };
        Some(scheduler::cron::next_fire(expr, tz, Utc::now()).map_err(|_| StatusCode::BAD_REQUEST)?)
    } else {
        None
    };

    wf_repo::set_schedule(
        &state.pool,
        id,
        payload.enabled,
        payload.cron_expression.as_deref(),
        payload.timezone.as_deref(),
        &payload.overlap_mode,
        next_run,
    )
    .await
    .map(Json)
    .map_err(db_error_status)
}

pub async fn export(Path(id): Path<i64>, State(state): State<AppState>) -> Result<Json<ExportedWorkflow>, StatusCode> {
    export::export_workflow(&state.pool, id).await.map(Json).map_err(|e| engine_error_status(&e))
}

pub async fn import(
    State(state): State<AppState>,
    Json(payload): Json<ExportedWorkflow>,
) -> Result<(StatusCode, Json<WorkflowRow>), StatusCode> {
    export::import_workflow(&state.pool, payload)
        .await
        .map(|row| (StatusCode::CREATED, Json(row)))
        .map_err(|e| engine_error_status(&e))
}

fn db_error_status(err: db::DbError) -> StatusCode {
    match err {
        db::DbError::NotFound => StatusCode::NOT_FOUND,
        db::DbError::Duplicate => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
