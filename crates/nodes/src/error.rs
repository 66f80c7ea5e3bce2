//! Node-level error type.

use thiserror::Error;

/// Errors raised internally by an executor while building an `Outcome`.
///
/// - `Retryable` — transient; the caller may retry with back-off.
/// - `Fatal`     — permanent; no retry should be attempted.
///
/// Executors don't return this directly (see [`crate::traits::Outcome`]);
/// it's the intermediate type they use to build `Outcome::Failed`.
#[derive(Debug, Error, Clone)]
pub enum NodeError {
    #[error("retryable node error: {0}")]
    Retryable(String),

    #[error("fatal node error: {0}")]
    Fatal(String),
}

impl NodeError {
    pub fn message(&self) -> &str {
        match self {
            NodeError::Retryable(m) | NodeError::Fatal(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, NodeError::Retryable(_))
    }
}
