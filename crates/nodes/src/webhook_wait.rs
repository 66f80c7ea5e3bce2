//! Webhook-wait node — suspends until an external `POST /resume/{token}`
//! call resumes it, or its timeout elapses.
//!
//! Minting the `SuspensionToken` row is the Orchestrator's job (it owns
//! the database handle); this executor only validates the timeout and
//! signals the suspend — the Orchestrator fills in the real token before
//! recording `NODE_SUSPENDED`.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, SuspendReason};

#[derive(Debug, Deserialize)]
struct WebhookWaitConfig {
    timeout_ms: i64,
}

pub struct WebhookWaitExecutor;

#[async_trait]
impl NodeExecutor for WebhookWaitExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: WebhookWaitConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid webhook_wait node config: {e}")),
        };

        if config.timeout_ms <= 0 {
            return Outcome::permanent_failed("timeout_ms must be positive");
        }

        let wake_at = chrono::Utc::now() + ChronoDuration::milliseconds(config.timeout_ms);
        Outcome::Suspended { token: None, wake_at: Some(wake_at), reason: SuspendReason::Webhook }
    }
}
