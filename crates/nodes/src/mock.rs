//! `MockExecutor` — a test double for [`crate::traits::NodeExecutor`].
//!
//! Useful in engine/scheduler tests where a real node implementation is
//! either unavailable or irrelevant.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, SuspendReason};

/// Behaviour injected into `MockExecutor` at construction time.
pub enum MockBehaviour {
    ReturnValue(Value),
    FailRetryable(String),
    FailFatal(String),
    Suspend(SuspendReason),
}

/// Records every task it receives and returns a programmer-specified
/// outcome.
pub struct MockExecutor {
    pub name: String,
    pub behaviour: MockBehaviour,
    pub calls: Arc<Mutex<Vec<Value>>>,
}

impl MockExecutor {
    pub fn returning(name: impl Into<String>, value: Value) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::ReturnValue(value), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn failing_fatal(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailFatal(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing_retryable(name: impl Into<String>, msg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            behaviour: MockBehaviour::FailRetryable(msg.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn suspending(name: impl Into<String>, reason: SuspendReason) -> Self {
        Self { name: name.into(), behaviour: MockBehaviour::Suspend(reason), calls: Arc::new(Mutex::new(Vec::new())) }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl NodeExecutor for MockExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        self.calls.lock().unwrap().push(task.resolved_inputs.clone());

        match &self.behaviour {
            MockBehaviour::ReturnValue(v) => {
                let mut out = json!({ "node": self.name });
                if let (Some(out_obj), Some(v_obj)) = (out.as_object_mut(), v.as_object()) {
                    for (k, val) in v_obj {
                        out_obj.insert(k.clone(), val.clone());
                    }
                }
                Outcome::Completed { output: out }
            }
            MockBehaviour::FailRetryable(msg) => Outcome::transport_failed(msg.clone()),
            MockBehaviour::FailFatal(msg) => Outcome::permanent_failed(msg.clone()),
            MockBehaviour::Suspend(reason) => Outcome::Suspended { token: None, wake_at: None, reason: *reason },
        }
    }
}
