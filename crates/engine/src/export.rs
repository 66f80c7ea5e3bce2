//! Workflow export/import round trip — a portable document form of a
//! workflow's draft graph, for backup or moving a workflow between
//! deployments. Versions and runs are never included: importing always
//! lands as a fresh draft that still has to be published.

use serde::{Deserialize, Serialize};

use db::models::WorkflowRow;
use db::DbPool;

use crate::dag::validate_dag;
use crate::models::Graph;
use crate::EngineError;

/// The portable form of a workflow: name plus its draft graph. No id, no
/// `active_version_id`, no schedule — those are either meaningless
/// outside the originating deployment or left for the importer to set up
/// explicitly via `publish`/`set_schedule`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedWorkflow {
    pub name: String,
    pub graph: Graph,
}

/// Serialize a workflow's current draft graph for export.
pub async fn export_workflow(pool: &DbPool, workflow_id: i64) -> Result<ExportedWorkflow, EngineError> {
    let row: WorkflowRow = db::repository::workflows::get_workflow(pool, workflow_id).await?;
    let graph: Graph = serde_json::from_value(row.graph)?;
    Ok(ExportedWorkflow { name: row.name, graph })
}

/// Validate and persist an exported workflow as a brand new draft. Always
/// creates rather than overwrites — importing a workflow you already have
/// is meant to produce a second copy, not silently replace the original.
pub async fn import_workflow(pool: &DbPool, exported: ExportedWorkflow) -> Result<WorkflowRow, EngineError> {
    validate_dag(&exported.graph)?;
    let graph_value = serde_json::to_value(&exported.graph)?;
    let row = db::repository::workflows::create_workflow(pool, &exported.name, graph_value).await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition};

    fn sample_graph() -> Graph {
        Graph {
            webhook_path: None,
            nodes: vec![
                NodeDefinition { id: "a".into(), node_type: "delay".into(), config: serde_json::json!({ "duration_ms": 1 }) },
                NodeDefinition { id: "b".into(), node_type: "delay".into(), config: serde_json::json!({ "duration_ms": 1 }) },
            ],
            edges: vec![Edge { from: "a".into(), to: "b".into(), source_handle: None }],
        }
    }

    #[test]
    fn exported_workflow_round_trips_through_json() {
        let exported = ExportedWorkflow { name: "demo".into(), graph: sample_graph() };
        let json = serde_json::to_string(&exported).unwrap();
        let back: ExportedWorkflow = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "demo");
        assert_eq!(back.graph.nodes.len(), 2);
        assert_eq!(back.graph.edges.len(), 1);
    }

    #[test]
    fn exported_workflow_with_cycle_fails_validation_before_import() {
        let mut graph = sample_graph();
        graph.edges.push(Edge { from: "b".into(), to: "a".into(), source_handle: None });
        assert!(validate_dag(&graph).is_err());
    }
}
