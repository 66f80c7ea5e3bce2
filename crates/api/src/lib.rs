//! `api` crate — HTTP REST API layer: the Run API trigger surface (§4.1),
//! workflow CRUD + publish, webhook ingress + resume, and cron
//! enable/disable.
//!
//! Exposes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/:id
//!   PUT    /api/v1/workflows/:id/graph
//!   POST   /api/v1/workflows/:id/publish
//!   PUT    /api/v1/workflows/:id/schedule
//!   DELETE /api/v1/workflows/:id
//!   POST   /api/v1/workflows/:id/execute
//!   GET    /api/v1/runs/:id
//!   POST   /api/v1/runs/:id/cancel
//!   POST   /webhook/:path
//!   POST   /resume/:token

pub mod handlers;

use std::sync::Arc;

use axum::{
    http::StatusCode,
    routing::{get, post, put},
    Router,
};
use db::DbPool;
use queue::DispatchQueue;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub queue: Arc<dyn DispatchQueue>,
}

/// Map an [`engine::EngineError`] onto the HTTP status the Run API
/// contract (§4.1, §7) assigns it: `NoActiveVersion`/`DepthExceeded`/graph
/// validation failures are client errors (the caller asked for something
/// that can't be satisfied), everything else is a server-side failure.
pub fn engine_error_status(err: &engine::EngineError) -> StatusCode {
    use engine::EngineError::*;
    match err {
        NoActiveVersion | DepthExceeded | DuplicateNodeId(_) | UnknownNodeReference { .. } | CycleDetected
        | InvalidRouterHandle { .. } | InvalidBranchHandle { .. } | InvalidGraph(_) => StatusCode::BAD_REQUEST,
        NodeNotFound(_) | Database(db::DbError::NotFound) => StatusCode::NOT_FOUND,
        Database(_) | Queue(_) | Conflict => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub async fn serve(bind: &str, pool: DbPool, queue: Arc<dyn DispatchQueue>) -> Result<(), std::io::Error> {
    let state = AppState { pool, queue };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_router = Router::new()
        .route("/workflows", get(handlers::workflows::list).post(handlers::workflows::create))
        .route("/workflows/:id", get(handlers::workflows::get).delete(handlers::workflows::delete))
        .route("/workflows/:id/graph", put(handlers::workflows::update_graph))
        .route("/workflows/:id/publish", post(handlers::workflows::publish))
        .route("/workflows/:id/schedule", put(handlers::workflows::set_schedule))
        .route("/workflows/:id/export", get(handlers::workflows::export))
        .route("/workflows/import", post(handlers::workflows::import))
        .route("/workflows/:id/execute", post(handlers::executions::execute))
        .route("/runs/:id", get(handlers::executions::get_run))
        .route("/runs/:id/cancel", post(handlers::executions::cancel));

    let app = Router::new()
        .nest("/api/v1", api_router)
        .route("/webhook/:path", post(handlers::webhooks::handle_webhook))
        .route("/resume/:token", post(handlers::webhooks::resume))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await
}
