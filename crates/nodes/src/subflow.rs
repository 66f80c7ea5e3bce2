//! Sub-flow node — spawns a child Run and suspends until it reaches a
//! terminal state.
//!
//! Creating the child Run is the Orchestrator's job: it owns the depth
//! check and the transactional Run API, neither of which this crate has
//! access to. This executor only validates the node's configuration and
//! signals the intent to spawn; `engine::orchestrator` performs the
//! actual `CreateRun` call and records the real child run id.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, SuspendReason};

#[derive(Debug, Clone, Deserialize)]
pub struct SubflowConfig {
    pub child_workflow_id: i64,
    #[serde(default)]
    pub child_version_id: Option<Uuid>,
}

pub struct SubflowExecutor;

#[async_trait]
impl NodeExecutor for SubflowExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        if let Err(e) = serde_json::from_value::<SubflowConfig>(task.node_config.clone()) {
            return Outcome::permanent_failed(format!("invalid subflow node config: {e}"));
        }
        Outcome::Suspended { token: None, wake_at: None, reason: SuspendReason::Subflow }
    }
}
