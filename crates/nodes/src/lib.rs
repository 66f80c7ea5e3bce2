//! `nodes` crate — the `NodeExecutor` contract and the built-in executors
//! for every node kind (HTTP, Code, Delay, Webhook-wait, Router, LLM,
//! Sub-flow, Map).
//!
//! The engine crate dispatches execution through [`traits::NodeExecutor`]
//! via the [`registry`] lookup table; nodes are a tagged variant with one
//! polymorphism point, not a class hierarchy.

pub mod code;
pub mod delay;
pub mod error;
pub mod http;
pub mod llm;
pub mod map;
pub mod mock;
pub mod registry;
pub mod router;
pub mod subflow;
pub mod template;
pub mod traits;
pub mod webhook_wait;

pub use error::NodeError;
pub use registry::{default_registry, NodeRegistry};
pub use traits::{ErrorKind, ExecuteTask, NodeExecutor, Outcome, StreamChunk, StreamSink, SuspendReason};
