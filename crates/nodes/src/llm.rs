//! LLM node — a streaming POST against an OpenAI-compatible
//! `/chat/completions` endpoint. Token chunks go to `stream_sink` as they
//! arrive; the full content and usage accounting land in the completion
//! output.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::traits::{ExecuteTask, NodeExecutor, Outcome, StreamChunk};

#[derive(Debug, Deserialize)]
struct LlmConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    api_key: String,
    model: String,
    messages: Value,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_timeout_ms() -> u64 {
    60_000
}
fn default_max_attempts() -> u32 {
    2
}

enum StreamError {
    Transport(String),
    Permanent(String),
}

pub struct LlmExecutor {
    client: Client,
}

impl LlmExecutor {
    pub fn new() -> Self {
        Self { client: Client::new() }
    }

    async fn stream_once(&self, task: &ExecuteTask, config: &LlmConfig) -> Result<Outcome, StreamError> {
        let body = json!({
            "model": config.model,
            "messages": config.messages,
            "stream": true,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", config.base_url.trim_end_matches('/')))
            .bearer_auth(&config.api_key)
            .timeout(std::time::Duration::from_millis(config.timeout_ms))
            .json(&body)
            .send()
            .await
            .map_err(|e| StreamError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_client_error() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StreamError::Permanent(format!("llm endpoint rejected request ({status}): {text}")));
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(StreamError::Transport(format!("llm endpoint returned {status}: {text}")));
        }

        let mut stream = resp.bytes_stream();
        let mut buf = String::new();
        let mut content = String::new();
        let mut index = 0u32;
        let mut prompt_tokens = 0u64;
        let mut completion_tokens = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| StreamError::Transport(e.to_string()))?;
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find('\n') {
                let line = buf[..pos].trim().to_owned();
                buf.drain(..=pos);

                let Some(data) = line.strip_prefix("data:") else { continue };
                let data = data.trim();
                if data.is_empty() || data == "[DONE]" {
                    continue;
                }
                let Ok(event) = serde_json::from_str::<Value>(data) else { continue };

                if let Some(usage) = event.get("usage") {
                    prompt_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(prompt_tokens);
                    completion_tokens =
                        usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(completion_tokens);
                }
                if let Some(delta) = event["choices"][0]["delta"]["content"].as_str() {
                    content.push_str(delta);
                    task.stream_sink
                        .publish(StreamChunk::Token {
                            node_id: task.node_id.clone(),
                            index,
                            content: delta.to_owned(),
                        })
                        .await;
                    index += 1;
                }
            }
        }

        task.stream_sink.publish(StreamChunk::Complete { node_id: task.node_id.clone() }).await;

        Ok(Outcome::Completed {
            output: json!({
                "content": content,
                "usage": { "prompt_tokens": prompt_tokens, "completion_tokens": completion_tokens },
            }),
        })
    }
}

impl Default for LlmExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for LlmExecutor {
    async fn execute(&self, task: &ExecuteTask) -> Outcome {
        let config: LlmConfig = match serde_json::from_value(task.node_config.clone()) {
            Ok(c) => c,
            Err(e) => return Outcome::permanent_failed(format!("invalid llm node config: {e}")),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.stream_once(task, &config).await {
                Ok(outcome) => return outcome,
                Err(StreamError::Permanent(msg)) => return Outcome::permanent_failed(msg),
                Err(StreamError::Transport(msg)) if attempt < config.max_attempts => {
                    tracing::warn!(attempt, "llm node transport error, retrying: {msg}");
                    tokio::time::sleep(std::time::Duration::from_millis(250 * attempt as u64)).await;
                }
                Err(StreamError::Transport(msg)) => {
                    return Outcome::permanent_failed(format!("llm request failed after {attempt} attempts: {msg}"))
                }
            }
        }
    }
}
