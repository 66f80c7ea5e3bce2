//! HTTP node — a bounded-time request with retry on 5xx/network failures.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{ExecuteTask, NodeExecutor, Outcome};

#[derive(Debug, Deserialize)]
struct HttpConfig {
    #[serde(default = "default_method")]
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_method() -> String {
    "GET".into()
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_attempts() -> u32 {
    3
}

pub struct HttpExecutor {
    client: Client,
}

impl HttpExecutor {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: HttpConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid http node config: {e}")),
        };

        let method = match config.method.to_uppercase().parse::<Method>() {
            Ok(m) => m,
            Err(_) => return Outcome::permanent_failed(format!("invalid HTTP method '{}'", config.method)),
        };

        let timeout = Duration::from_millis(config.timeout_ms);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut req = self.client.request(method.clone(), &config.url).timeout(timeout);
            for (k, v) in &config.headers {
                req = req.header(k, v);
            }
            if let Some(body) = &config.body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        let content_type = resp
                            .headers()
                            .get(reqwest::header::CONTENT_TYPE)
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_owned();
                        let headers: serde_json::Map<String, Value> = resp
                            .headers()
                            .iter()
                            .map(|(k, v)| (k.to_string(), json!(v.to_str().unwrap_or_default())))
                            .collect();

                        let body_text = match resp.text().await {
                            Ok(t) => t,
                            Err(e) => return Outcome::transport_failed(format!("reading response body: {e}")),
                        };
                        let parsed_body = if content_type.contains("json") {
                            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text.clone()))
                        } else {
                            Value::String(body_text)
                        };

                        return Outcome::Completed {
                            output: json!({
                                "status": status.as_u16(),
                                "headers": Value::Object(headers),
                                "body": parsed_body,
                            }),
                        };
                    }

                    if status.is_server_error() && attempt < config.max_attempts {
                        tracing::warn!(attempt, status = status.as_u16(), "http node 5xx, retrying");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }

                    let body_text = resp.text().await.unwrap_or_default();
                    return Outcome::permanent_failed(format!("http {}: {}", status.as_u16(), body_text));
                }
                Err(e) if e.is_timeout() => {
                    if attempt < config.max_attempts {
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Outcome::timeout(format!("http request timed out after {attempt} attempts"), false);
                }
                Err(e) => {
                    if attempt < config.max_attempts {
                        tracing::warn!(attempt, "http node transport error, retrying: {e}");
                        tokio::time::sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Outcome::permanent_failed(format!("http request failed after {attempt} attempts: {e}"));
                }
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::traits::NullSink;

    fn task_for(url: String) -> ExecuteTask {
        ExecuteTask {
            run_id: Uuid::new_v4(),
            node_id: "h".into(),
            node_config: json!({ "method": "GET", "url": url }),
            resolved_inputs: Value::Null,
            retry_count: 0,
            deadline: chrono::Utc::now() + chrono::Duration::seconds(10),
            stream_sink: Arc::new(NullSink),
        }
    }

    #[tokio::test]
    async fn success_response_is_completed_with_parsed_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hello": "world"})))
            .mount(&server)
            .await;

        let outcome = HttpExecutor::new().execute(&task_for(format!("{}/ok", server.uri()))).await;
        match outcome {
            Outcome::Completed { output } => {
                assert_eq!(output["status"], 200);
                assert_eq!(output["body"]["hello"], "world");
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_4xx_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = HttpExecutor::new().execute(&task_for(format!("{}/missing", server.uri()))).await;
        assert!(matches!(outcome, Outcome::Failed { retryable: false, .. }));
    }

    #[tokio::test]
    async fn repeated_5xx_exhausts_retries_and_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/flaky"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut task = task_for(format!("{}/flaky", server.uri()));
        task.node_config = json!({ "method": "GET", "url": task.node_config["url"], "max_attempts": 2 });
        let outcome = HttpExecutor::new().execute(&task).await;
        assert!(matches!(outcome, Outcome::Failed { retryable: false, .. }));
    }
}
