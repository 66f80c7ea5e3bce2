//! Map node — fans an array of items out to child runs with bounded
//! concurrency.
//!
//! Creating the `BatchOperation` row and spawning the first wave is
//! `engine::mapengine`'s job — it owns the database handle and the child
//! graph cache needed to avoid re-reading the workflow per item. This
//! executor only validates configuration and signals the intent to fan
//! out; `MapConfig` is `pub` so the engine crate can deserialize the same
//! shape without duplicating it.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, SuspendReason};

#[derive(Debug, Clone, Deserialize)]
pub struct MapConfig {
    pub child_workflow_id: i64,
    #[serde(default)]
    pub child_version_id: Option<Uuid>,
    pub input_items: Vec<Value>,
    #[serde(default = "default_concurrency")]
    pub concurrency_limit: i32,
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub timeout_ms: Option<i64>,
}

fn default_concurrency() -> i32 {
    1
}

pub struct MapExecutor;

#[async_trait]
impl NodeExecutor for MapExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        match serde_json::from_value::<MapConfig>(task.node_config.clone()) {
            Ok(config) if config.concurrency_limit < 1 => {
                Outcome::permanent_failed("concurrency_limit must be at least 1")
            }
            Ok(_) => Outcome::Suspended { token: None, wake_at: None, reason: SuspendReason::Map },
            Err(e) => Outcome::permanent_failed(format!("invalid map node config: {e}")),
        }
    }
}
