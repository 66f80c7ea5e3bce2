//! The `NodeTask` envelope carried by the dispatch queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a worker pops off the queue. The queue is the only place task
/// state lives between the Orchestrator and a worker — it is not
/// authoritative, so re-enqueueing from the event log must always be safe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeTask {
    pub run_id: Uuid,
    pub node_id: String,
    pub node_type: String,
    /// 0 on first dispatch, incremented on each retry.
    pub attempt: u32,
    pub enqueued_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

impl NodeTask {
    pub fn new(run_id: Uuid, node_id: impl Into<String>, node_type: impl Into<String>, timeout: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            node_id: node_id.into(),
            node_type: node_type.into(),
            attempt: 0,
            enqueued_at: now,
            deadline: now + timeout,
        }
    }

    pub fn retry(&self, timeout: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            attempt: self.attempt + 1,
            enqueued_at: now,
            deadline: now + timeout,
            ..self.clone()
        }
    }
}
