//! Run event taxonomy and the fold that reconstructs derived run state from
//! the append-only event log — the single source of truth for a run.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use db::models::RunEventRow;

pub const RUN_CREATED: &str = "RUN_CREATED";
pub const NODE_SCHEDULED: &str = "NODE_SCHEDULED";
pub const NODE_STARTED: &str = "NODE_STARTED";
pub const NODE_COMPLETED: &str = "NODE_COMPLETED";
pub const NODE_FAILED: &str = "NODE_FAILED";
pub const NODE_SUSPENDED: &str = "NODE_SUSPENDED";
pub const NODE_RESUMED: &str = "NODE_RESUMED";
pub const NODE_RETRIED: &str = "NODE_RETRIED";
pub const RUN_COMPLETED: &str = "RUN_COMPLETED";
pub const RUN_FAILED: &str = "RUN_FAILED";
pub const RUN_CANCELLED: &str = "RUN_CANCELLED";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled)
    }
}

/// Derived state reconstructed by folding a run's event log. This, plus
/// the frozen `snapshot_graph`, is everything the orchestrator needs to
/// decide what happens next — nothing is cached anywhere else.
#[derive(Debug, Clone, Default)]
pub struct FoldedRun {
    pub status: Option<RunStatus>,
    /// Every node id that has been dispatched to a worker at least once.
    pub visited: HashSet<String>,
    /// Every node id a `NODE_SCHEDULED` event was recorded for. A node
    /// blocks run completion while scheduled but not yet terminal.
    pub scheduled: HashSet<String>,
    /// Every node id that reached a terminal state: `Some(output)` for a
    /// completion, `None` for a failure.
    pub terminal: HashMap<String, Option<Value>>,
    /// Router `matched_outputs` per node id, used to restrict successors.
    pub matched_outputs: HashMap<String, Vec<String>>,
    /// Highest retry_count seen per node, for the next dispatch/resume.
    pub retry_counts: HashMap<String, i32>,
    pub output_data: Option<Value>,
}

impl FoldedRun {
    pub fn fold(events: &[RunEventRow]) -> Self {
        let mut folded = FoldedRun::default();

        for event in events {
            match event.event_type.as_str() {
                RUN_CREATED => folded.status = Some(RunStatus::Running),
                NODE_SCHEDULED => {
                    if let Some(node_id) = &event.node_id {
                        folded.scheduled.insert(node_id.clone());
                    }
                }
                NODE_STARTED => {
                    if let Some(node_id) = &event.node_id {
                        folded.visited.insert(node_id.clone());
                        if let Some(rc) = event.retry_count {
                            let entry = folded.retry_counts.entry(node_id.clone()).or_insert(0);
                            *entry = (*entry).max(rc);
                        }
                    }
                }
                NODE_COMPLETED => {
                    if let Some(node_id) = &event.node_id {
                        let output = event.payload.get("output").cloned().unwrap_or(Value::Null);
                        if let Some(matched) = output.get("matched_outputs").and_then(|v| v.as_array()) {
                            folded.matched_outputs.insert(
                                node_id.clone(),
                                matched.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
                            );
                        }
                        folded.terminal.insert(node_id.clone(), Some(output));
                    }
                }
                NODE_FAILED => {
                    if let Some(node_id) = &event.node_id {
                        folded.terminal.insert(node_id.clone(), None);
                    }
                }
                RUN_COMPLETED => {
                    folded.status = Some(RunStatus::Completed);
                    folded.output_data = event.payload.get("output").cloned();
                }
                RUN_FAILED => folded.status = Some(RunStatus::Failed),
                RUN_CANCELLED => folded.status = Some(RunStatus::Cancelled),
                _ => {}
            }
        }

        folded
    }

    /// Completed nodes' outputs, keyed by node id — the scope prior-node
    /// template references (`{{node_id.path}}`) resolve against.
    pub fn node_outputs(&self) -> HashMap<String, Value> {
        self.terminal.iter().filter_map(|(k, v)| v.clone().map(|value| (k.clone(), value))).collect()
    }
}
