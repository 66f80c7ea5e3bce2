//! `engine` crate — graph/version/run domain model, the append-only
//! event log, the Orchestrator, and the Map engine.
//!
//! Nothing here talks to a worker directly: the Orchestrator only reads
//! and writes `db`/`queue`, and hands `nodes::ExecuteTask`s to whichever
//! worker loop pops them off the `DispatchQueue` (see `cli::worker`).

pub mod dag;
pub mod error;
pub mod export;
pub mod mapengine;
pub mod models;
pub mod orchestrator;
pub mod reconcile;
pub mod run;
pub mod version;

pub use dag::validate_dag;
pub use error::EngineError;
pub use models::{Edge, Graph, NodeDefinition};
