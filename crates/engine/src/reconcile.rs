//! Run consistency checking (§9: "reconcile status from log ... is
//! recommended"). Not wired into the Scheduler's hot tick — this is a
//! maintenance-time tool, invoked on demand via `cli validate --reconcile
//! <run_id>`, for catching drift between a run's derived status and what
//! its own event log actually supports.

use std::collections::HashSet;

use db::models::RunEventRow;
use db::DbPool;
use serde::Serialize;
use uuid::Uuid;

use crate::models::Graph;
use crate::run::FoldedRun;
use crate::EngineError;

#[derive(Debug, Clone, Serialize)]
pub struct ReconcileReport {
    pub run_id: Uuid,
    pub consistent: bool,
    pub issues: Vec<String>,
}

/// Fetch a run's snapshot graph and event log, then check them against
/// each other.
pub async fn reconcile_run(pool: &DbPool, run_id: Uuid) -> Result<ReconcileReport, EngineError> {
    let run = db::repository::runs::get_run(pool, run_id).await?;
    let graph: Graph = serde_json::from_value(run.snapshot_graph.clone())?;
    let events = db::repository::events::list_for_run(pool, run_id).await?;

    let issues = reconcile_events(&graph, &run.status, &events);
    Ok(ReconcileReport { run_id, consistent: issues.is_empty(), issues })
}

/// The pure check, separated out so it can be exercised against a
/// hand-built event log without a database.
fn reconcile_events(graph: &Graph, stored_status: &str, events: &[RunEventRow]) -> Vec<String> {
    let folded = FoldedRun::fold(events);
    let mut issues = Vec::new();

    let graph_node_ids: HashSet<&str> = graph.nodes.iter().map(|n| n.id.as_str()).collect();

    for node_id in &folded.scheduled {
        if !graph_node_ids.contains(node_id.as_str()) {
            issues.push(format!("node `{node_id}` was scheduled but is not present in the run's snapshot graph"));
        }
    }

    for (node_id, _) in &folded.terminal {
        if !folded.scheduled.contains(node_id) {
            issues.push(format!("node `{node_id}` reached a terminal state without ever being scheduled"));
        }
    }

    let folded_status_str = folded.status.map(|s| s.as_str()).unwrap_or("unknown");
    if folded_status_str != stored_status {
        issues.push(format!(
            "stored run status `{stored_status}` disagrees with the status folded from the event log (`{folded_status_str}`)"
        ));
    }

    if let Some(status) = folded.status {
        if status.is_terminal() {
            let unresolved: Vec<&String> = folded.scheduled.iter().filter(|n| !folded.terminal.contains_key(n.as_str())).collect();
            if !unresolved.is_empty() {
                issues.push(format!("run is {} but these scheduled nodes never reached a terminal state: {unresolved:?}", status.as_str()));
            }
        }
    } else {
        issues.push("no RUN_CREATED event found — run has no derivable status".to_owned());
    }

    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Edge, NodeDefinition};
    use crate::run::{NODE_COMPLETED, NODE_SCHEDULED, NODE_STARTED, RUN_COMPLETED, RUN_CREATED};
    use serde_json::json;

    fn linear_graph() -> Graph {
        Graph {
            webhook_path: None,
            nodes: vec![
                NodeDefinition { id: "a".into(), node_type: "delay".into(), config: json!({}) },
                NodeDefinition { id: "b".into(), node_type: "delay".into(), config: json!({}) },
            ],
            edges: vec![Edge { from: "a".into(), to: "b".into(), source_handle: None }],
        }
    }

    fn event(node_id: Option<&str>, event_type: &str, payload: serde_json::Value) -> RunEventRow {
        RunEventRow {
            id: 0,
            run_id: Uuid::nil(),
            node_id: node_id.map(String::from),
            event_type: event_type.to_owned(),
            payload,
            retry_count: None,
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn consistent_completed_run_has_no_issues() {
        let graph = linear_graph();
        let events = vec![
            event(None, RUN_CREATED, json!({})),
            event(Some("a"), NODE_SCHEDULED, json!(null)),
            event(Some("a"), NODE_STARTED, json!(null)),
            event(Some("a"), NODE_COMPLETED, json!({ "output": {} })),
            event(Some("b"), NODE_SCHEDULED, json!(null)),
            event(Some("b"), NODE_STARTED, json!(null)),
            event(Some("b"), NODE_COMPLETED, json!({ "output": {} })),
            event(None, RUN_COMPLETED, json!({ "output": {} })),
        ];

        let issues = reconcile_events(&graph, "completed", &events);
        assert!(issues.is_empty(), "unexpected issues: {issues:?}");
    }

    #[test]
    fn completed_run_missing_a_terminal_node_is_flagged() {
        let graph = linear_graph();
        let events = vec![
            event(None, RUN_CREATED, json!({})),
            event(Some("a"), NODE_SCHEDULED, json!(null)),
            event(Some("b"), NODE_SCHEDULED, json!(null)),
            event(Some("a"), NODE_COMPLETED, json!({ "output": {} })),
            event(None, RUN_COMPLETED, json!({ "output": {} })),
        ];

        let issues = reconcile_events(&graph, "completed", &events);
        assert!(issues.iter().any(|i| i.contains("never reached a terminal state")));
    }

    #[test]
    fn stored_status_mismatch_is_flagged() {
        let graph = linear_graph();
        let events = vec![event(None, RUN_CREATED, json!({})), event(Some("a"), NODE_SCHEDULED, json!(null))];

        let issues = reconcile_events(&graph, "completed", &events);
        assert!(issues.iter().any(|i| i.contains("disagrees with")));
    }

    #[test]
    fn scheduled_node_outside_the_graph_is_flagged() {
        let graph = linear_graph();
        let events = vec![event(None, RUN_CREATED, json!({})), event(Some("ghost"), NODE_SCHEDULED, json!(null))];

        let issues = reconcile_events(&graph, "running", &events);
        assert!(issues.iter().any(|i| i.contains("not present in the run's snapshot graph")));
    }
}
