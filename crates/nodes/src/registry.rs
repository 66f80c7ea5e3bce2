//! Maps `node_type` tags to their executor. The dispatcher — the worker
//! loop in the `cli` crate — looks an implementation up here by tag; there
//! is no inheritance, just this one table.

use std::collections::HashMap;
use std::sync::Arc;

use crate::traits::NodeExecutor;
use crate::{
    code::CodeExecutor, delay::DelayExecutor, http::HttpExecutor, llm::LlmExecutor, map::MapExecutor,
    router::RouterExecutor, subflow::SubflowExecutor, webhook_wait::WebhookWaitExecutor,
};

pub type NodeRegistry = HashMap<String, Arc<dyn NodeExecutor>>;

/// The registry wired with the eight built-in node kinds.
pub fn default_registry() -> NodeRegistry {
    let mut registry: NodeRegistry = HashMap::new();
    registry.insert("http".into(), Arc::new(HttpExecutor::new()));
    registry.insert("code".into(), Arc::new(CodeExecutor));
    registry.insert("delay".into(), Arc::new(DelayExecutor));
    registry.insert("webhook_wait".into(), Arc::new(WebhookWaitExecutor));
    registry.insert("router".into(), Arc::new(RouterExecutor));
    registry.insert("llm".into(), Arc::new(LlmExecutor::new()));
    registry.insert("subflow".into(), Arc::new(SubflowExecutor));
    registry.insert("map".into(), Arc::new(MapExecutor));
    registry
}
