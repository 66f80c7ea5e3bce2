//! Engine-level error types.

use thiserror::Error;

/// Errors produced by the workflow engine: graph validation, run
/// orchestration, and map/sub-flow bookkeeping.
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Graph validation ------
    /// Two or more nodes share the same ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the graph.
    #[error("edge references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference { node_id: String, side: &'static str },

    /// Topological sort detected a cycle.
    #[error("workflow graph contains a cycle")]
    CycleDetected,

    /// A router node has an outgoing edge whose handle matches none of
    /// its conditions or configured default.
    #[error("router node '{node_id}' has an outgoing edge with unknown handle '{handle}'")]
    InvalidRouterHandle { node_id: String, handle: String },

    /// A sub-flow/map node has an outgoing edge using a handle other
    /// than `success`/`error`.
    #[error("{kind} node '{node_id}' has an outgoing edge with handle '{handle}'; only 'success'/'error' are valid")]
    InvalidBranchHandle { node_id: String, kind: String, handle: String },

    /// The graph failed to (de)serialize, or failed validation at a point
    /// where a typed variant doesn't already exist for it.
    #[error("invalid graph: {0}")]
    InvalidGraph(String),

    // ------ Run orchestration ------
    /// A node id referenced by run bookkeeping isn't present in that
    /// run's frozen `snapshot_graph` — would indicate a corrupted run.
    #[error("node '{0}' not found in the run's snapshot graph")]
    NodeNotFound(String),

    /// Creating a run would exceed the maximum sub-flow/map nesting depth.
    #[error("run would exceed the maximum sub-flow/map nesting depth")]
    DepthExceeded,

    /// A run was requested against a workflow with no published version.
    #[error("workflow has no active version")]
    NoActiveVersion,

    /// Persistence error from the db crate.
    #[error("database error: {0}")]
    Database(#[from] db::DbError),

    /// Dispatch queue error.
    #[error("queue error: {0}")]
    Queue(#[from] queue::QueueError),

    /// The operation lost a race with concurrent bookkeeping — e.g. a map
    /// batch or run was already finalized by the time a reaper got to it.
    /// Callers should treat this as a no-op, not a failure.
    #[error("operation conflicts with a concurrent state change")]
    Conflict,
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::InvalidGraph(err.to_string())
    }
}
