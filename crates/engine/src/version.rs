//! Workflow publishing — validate the draft graph, then atomically
//! allocate an immutable `WorkflowVersion` and flip `active_version_id`.

use db::{models::WorkflowVersionRow, DbPool};
use serde_json::Value;

use crate::dag::validate_dag;
use crate::models::Graph;
use crate::EngineError;

pub struct PublishRequest {
    pub workflow_id: i64,
    pub graph: Graph,
    pub input_schema: Option<Value>,
    pub output_schema: Option<Value>,
    pub change_summary: Option<String>,
    pub created_by: Option<String>,
}

/// Validate `req.graph` and publish it as the workflow's new active
/// version. Runs in flight under the previous version are unaffected —
/// their `snapshot_graph` was already frozen at creation time.
pub async fn publish(pool: &DbPool, req: PublishRequest) -> Result<WorkflowVersionRow, EngineError> {
    validate_dag(&req.graph)?;

    let graph_json = serde_json::to_value(&req.graph)?;

    let row = db::repository::versions::publish(
        pool,
        req.workflow_id,
        graph_json,
        req.input_schema,
        req.output_schema,
        req.change_summary.as_deref(),
        req.created_by.as_deref(),
    )
    .await?;

    Ok(row)
}
