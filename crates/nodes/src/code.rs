//! Code node — runs user JavaScript in an isolated sandbox with a fixed
//! CPU/time budget.
//!
//! Evaluation happens on a blocking thread since quickjs is a synchronous
//! interpreter; the interrupt handler enforces the CPU budget independent
//! of the outer task's cancellation.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use rquickjs::{Context, Runtime};
use serde::Deserialize;
use serde_json::Value;

use crate::traits::{ExecuteTask, NodeExecutor, Outcome};

const MEMORY_LIMIT_BYTES: usize = 16 * 1024 * 1024;
const CPU_BUDGET: Duration = Duration::from_millis(2_000);

#[derive(Debug, Deserialize)]
struct CodeConfig {
    script: String,
    #[serde(default = "default_input_var")]
    input_var: String,
}

fn default_input_var() -> String {
    "INPUT".into()
}

pub struct CodeExecutor;

#[async_trait]
impl NodeExecutor for CodeExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: CodeConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid code node config: {e}")),
        };
        let input = task.resolved_inputs.clone();

        match tokio::task::spawn_blocking(move || run_sandboxed(&config.script, &config.input_var, &input)).await {
            Ok(Ok(value)) => Outcome::Completed { output: value },
            Ok(Err(msg)) => Outcome::permanent_failed(msg),
            Err(join_err) => Outcome::permanent_failed(format!("code node task panicked: {join_err}")),
        }
    }
}

fn run_sandboxed(script: &str, input_var: &str, input: &Value) -> Result<Value, String> {
    let runtime = Runtime::new().map_err(|e| format!("quickjs runtime init failed: {e}"))?;
    runtime.set_memory_limit(MEMORY_LIMIT_BYTES);

    let deadline = Instant::now() + CPU_BUDGET;
    runtime.set_interrupt_handler(Some(Box::new(move || Instant::now() >= deadline)));

    let context = Context::full(&runtime).map_err(|e| format!("quickjs context init failed: {e}"))?;

    context.with(|ctx| {
        let input_json = serde_json::to_string(input).map_err(|e| e.to_string())?;
        let script = format!(
            "JSON.stringify((function({input_var}) {{ {script} }})(JSON.parse({input_json:?})))"
        );
        let output_json: String = ctx.eval(script).map_err(|e| format!("script threw: {e}"))?;
        serde_json::from_str(&output_json)
            .map_err(|e| format!("script return value is not JSON-serializable: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::traits::NullSink;

    fn task_for(script: &str, input: Value) -> ExecuteTask {
        ExecuteTask {
            run_id: Uuid::new_v4(),
            node_id: "c".into(),
            node_config: serde_json::json!({ "script": script }),
            resolved_inputs: input,
            retry_count: 0,
            deadline: chrono::Utc::now() + chrono::Duration::seconds(5),
            stream_sink: Arc::new(NullSink),
        }
    }

    #[tokio::test]
    async fn returns_the_script_return_value() {
        let outcome = CodeExecutor
            .execute(&task_for("return { sum: INPUT.status };", serde_json::json!({"status": 200})))
            .await;
        match outcome {
            Outcome::Completed { output } => assert_eq!(output["sum"], 200),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn a_thrown_error_becomes_failed() {
        let outcome = CodeExecutor.execute(&task_for("throw new Error('boom');", Value::Null)).await;
        assert!(matches!(outcome, Outcome::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn an_infinite_loop_is_interrupted_by_the_cpu_budget() {
        let outcome = CodeExecutor.execute(&task_for("while (true) {}", Value::Null)).await;
        assert!(matches!(outcome, Outcome::Failed { .. }));
    }
}
