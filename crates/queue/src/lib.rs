//! `queue` crate — the dispatch queue boundary.
//!
//! The queue is an ordered, at-least-once work queue keyed by run. It is
//! not authoritative: the event log in `db` is. Re-enqueuing a task that
//! was already handled must be safe, because the queue can and will
//! redeliver (visibility-timeout expiry, consumer crash, network blip).
//!
//! Two implementations are provided: [`RedisQueue`], backing production
//! deployments, and [`MemoryQueue`], an in-process double for engine and
//! scheduler tests that shouldn't need a running Redis.

pub mod error;
pub mod memory;
pub mod redis_queue;
pub mod task;

pub use error::QueueError;
pub use memory::MemoryQueue;
pub use redis_queue::RedisQueue;
pub use task::NodeTask;

use async_trait::async_trait;
use std::time::Duration;

/// An opaque handle identifying one in-flight delivery. Required to `ack`
/// or `nack` the specific delivery, not just the underlying task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeliveryHandle(pub String);

/// The dispatch queue contract (§6 of the spec): per-message visibility
/// timeout, at-least-once delivery, no per-run FIFO guarantee (siblings in
/// a fan-out are unordered by design).
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    /// Push a task onto the queue. Never blocks on a worker being available.
    async fn push(&self, task: NodeTask) -> Result<(), QueueError>;

    /// Pop the next available task, making it invisible to other consumers
    /// for `visibility_timeout`. Returns `None` if the queue is empty.
    async fn pop(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<(DeliveryHandle, NodeTask)>, QueueError>;

    /// Acknowledge successful processing; the task is removed for good.
    async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError>;

    /// Return the task to the queue immediately for redelivery (used when
    /// a worker observes a transient failure before its visibility timeout
    /// would otherwise expire).
    async fn nack(&self, handle: DeliveryHandle) -> Result<(), QueueError>;
}
