//! Router node — evaluates JS predicates in order against a resolved
//! value and restricts the successors the Orchestrator schedules.

use async_trait::async_trait;
use rquickjs::{Context, Runtime};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{ExecuteTask, NodeExecutor, Outcome};

#[derive(Debug, Deserialize)]
struct Condition {
    id: String,
    expr: String,
}

#[derive(Debug, Deserialize)]
struct RouterConfig {
    route_by: Value,
    conditions: Vec<Condition>,
    #[serde(default)]
    default: Option<String>,
    /// `false` (the default) is first-match: stop at the first satisfied
    /// condition. `true` evaluates every condition and matches them all.
    #[serde(default)]
    broadcast: bool,
}

pub struct RouterExecutor;

#[async_trait]
impl NodeExecutor for RouterExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: RouterConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid router node config: {e}")),
        };

        let mut matched = Vec::new();

        for condition in &config.conditions {
            match eval_predicate(&condition.expr, &config.route_by) {
                Ok(true) => {
                    matched.push(condition.id.clone());
                    if !config.broadcast {
                        break;
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    return Outcome::permanent_failed(format!(
                        "router predicate '{}' failed: {e}",
                        condition.id
                    ))
                }
            }
        }

        if matched.is_empty() {
            if let Some(default) = &config.default {
                matched.push(default.clone());
            }
        }

        Outcome::Completed { output: json!({ "matched_outputs": matched }) }
    }
}

fn eval_predicate(expr: &str, value: &Value) -> Result<bool, String> {
    let runtime = Runtime::new().map_err(|e| e.to_string())?;
    let context = Context::full(&runtime).map_err(|e| e.to_string())?;
    context.with(|ctx| {
        let value_json = serde_json::to_string(value).map_err(|e| e.to_string())?;
        let script = format!("Boolean((function(value) {{ return ({expr}); }})(JSON.parse({value_json:?})))");
        ctx.eval(script).map_err(|e| e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;

    use crate::traits::NullSink;

    fn task_for(config: Value) -> ExecuteTask {
        ExecuteTask {
            run_id: Uuid::new_v4(),
            node_id: "r".into(),
            node_config: config,
            resolved_inputs: Value::Null,
            retry_count: 0,
            deadline: chrono::Utc::now() + chrono::Duration::seconds(5),
            stream_sink: Arc::new(NullSink),
        }
    }

    #[tokio::test]
    async fn first_match_wins_and_stops_evaluating() {
        let outcome = RouterExecutor
            .execute(&task_for(json!({
                "route_by": 200,
                "conditions": [
                    {"id": "ok", "expr": "value < 300"},
                    {"id": "bad", "expr": "value >= 400"},
                ],
                "default": "other",
            })))
            .await;
        match outcome {
            Outcome::Completed { output } => assert_eq!(output["matched_outputs"], json!(["ok"])),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn no_match_and_no_default_schedules_nothing() {
        let outcome = RouterExecutor
            .execute(&task_for(json!({
                "route_by": 999,
                "conditions": [{"id": "ok", "expr": "value < 300"}],
            })))
            .await;
        match outcome {
            Outcome::Completed { output } => assert_eq!(output["matched_outputs"], json!([])),
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broadcast_mode_collects_every_matching_condition() {
        let outcome = RouterExecutor
            .execute(&task_for(json!({
                "route_by": 5,
                "broadcast": true,
                "conditions": [
                    {"id": "pos", "expr": "value > 0"},
                    {"id": "small", "expr": "value < 10"},
                    {"id": "neg", "expr": "value < 0"},
                ],
            })))
            .await;
        match outcome {
            Outcome::Completed { output } => {
                assert_eq!(output["matched_outputs"], json!(["pos", "small"]))
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }
}
