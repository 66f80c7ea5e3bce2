//! Core domain models for the workflow graph.
//!
//! A node's `config` stays an opaque JSON blob here — the tag in
//! `node_type` is the only polymorphism point, matching `nodes::registry`.
//! Parsing a node kind's own config shape (HTTP's `url`, Router's
//! `conditions`, ...) is that node's own business, not the graph's.

use serde::{Deserialize, Serialize};

/// A single step in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Unique identifier within this graph (referenced by edges).
    pub id: String,
    /// Looked up in `nodes::registry::default_registry()`.
    pub node_type: String,
    /// Node-kind-specific configuration. May contain `{{...}}` template
    /// expressions resolved against prior node outputs before dispatch.
    pub config: serde_json::Value,
}

/// Directed edge from one node to another.
///
/// `source_handle` disambiguates which of a node's several outgoing paths
/// this edge follows: a Router's condition id (or its configured
/// default), or `"success"`/`"error"` for Sub-flow and Map. `None` for a
/// plain node, which has exactly one outgoing path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
}

/// A complete workflow graph: the unit stored in `workflows.graph` (the
/// editable draft) and, frozen, in `workflow_versions.graph` /
/// `workflow_runs.snapshot_graph`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Graph {
    /// URL path segment that routes an incoming webhook to this workflow
    /// (`POST /webhook/{path}`). Absent for workflows only triggered
    /// manually or by cron.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_path: Option<String>,
    pub nodes: Vec<NodeDefinition>,
    pub edges: Vec<Edge>,
}
