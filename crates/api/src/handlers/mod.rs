//! HTTP handlers, one module per resource. Each imports [`crate::AppState`]
//! as `super::AppState` — re-exported here so every handler module can
//! `use super::AppState;` without reaching back up to the crate root.

pub mod executions;
pub mod webhooks;
pub mod workflows;

pub use crate::AppState;
