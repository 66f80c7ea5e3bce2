//! Delay node — short delays block inline, long ones suspend so the
//! Scheduler can wake the run later instead of holding a worker slot.

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use serde::Deserialize;
use serde_json::json;

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, SuspendReason};

/// Delays at or above this many milliseconds suspend instead of blocking.
/// `>=`, not `>`: a delay of exactly this value must take the suspended path.
pub const INLINE_THRESHOLD_MS: i64 = 60_000;

#[derive(Debug, Deserialize)]
struct DelayConfig {
    delay_ms: i64,
}

pub struct DelayExecutor;

#[async_trait]
impl NodeExecutor for DelayExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: DelayConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid delay node config: {e}")),
        };

        if config.delay_ms < 0 {
            return Outcome::permanent_failed("delay_ms must be non-negative");
        }

        if config.delay_ms >= INLINE_THRESHOLD_MS {
            let wake_at = chrono::Utc::now() + ChronoDuration::milliseconds(config.delay_ms);
            return Outcome::Suspended { token: None, wake_at: Some(wake_at), reason: SuspendReason::Delay };
        }

        tokio::time::sleep(std::time::Duration::from_millis(config.delay_ms as u64)).await;
        Outcome::Completed { output: json!({ "delayed_ms": config.delay_ms }) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::traits::NullSink;

    fn task_with_delay(delay_ms: i64) -> ExecuteTask {
        ExecuteTask {
            run_id: Uuid::new_v4(),
            node_id: "delay".into(),
            node_config: json!({ "delay_ms": delay_ms }),
            resolved_inputs: serde_json::Value::Null,
            retry_count: 0,
            deadline: chrono::Utc::now() + chrono::Duration::seconds(5),
            stream_sink: Arc::new(NullSink),
        }
    }

    #[tokio::test]
    async fn delay_below_threshold_completes_inline() {
        let outcome = DelayExecutor.execute(&task_with_delay(1)).await;
        assert!(matches!(outcome, Outcome::Completed { .. }));
    }

    #[tokio::test]
    async fn delay_at_exactly_the_threshold_suspends() {
        let outcome = DelayExecutor.execute(&task_with_delay(INLINE_THRESHOLD_MS)).await;
        assert!(matches!(outcome, Outcome::Suspended { reason: SuspendReason::Delay, .. }));
    }

    #[tokio::test]
    async fn negative_delay_is_a_permanent_config_error() {
        let outcome = DelayExecutor.execute(&task_with_delay(-1)).await;
        assert!(matches!(outcome, Outcome::Failed { retryable: false, .. }));
    }
}
