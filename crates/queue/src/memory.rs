//! In-process `DispatchQueue` double used by engine/scheduler tests.
//!
//! Mirrors the teacher's own philosophy in `executor_tests.rs` of an
//! in-process stand-in "so no real [external dependency] is required" —
//! applied here to the queue boundary instead of the database.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::{DeliveryHandle, DispatchQueue, NodeTask, QueueError};

struct InFlight {
    task: NodeTask,
    visible_at: Instant,
}

#[derive(Default)]
struct State {
    ready: VecDeque<NodeTask>,
    in_flight: HashMap<String, InFlight>,
}

/// An in-memory, single-process `DispatchQueue`. At-least-once semantics
/// are preserved: a popped task becomes invisible until `visibility_timeout`
/// elapses, at which point the next `pop` call reclaims it.
pub struct MemoryQueue {
    state: Mutex<State>,
    next_handle: AtomicU64,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_handle: AtomicU64::new(0),
        }
    }

    pub fn len(&self) -> usize {
        // Best-effort snapshot; fine for tests, not exposed as a hot-path API.
        self.state.try_lock().map(|s| s.ready.len() + s.in_flight.len()).unwrap_or(0)
    }
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn push(&self, task: NodeTask) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.ready.push_back(task);
        Ok(())
    }

    async fn pop(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<(DeliveryHandle, NodeTask)>, QueueError> {
        let mut state = self.state.lock().await;

        // Reclaim anything whose visibility timeout has expired.
        let now = Instant::now();
        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, v)| v.visible_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for handle in expired {
            if let Some(in_flight) = state.in_flight.remove(&handle) {
                state.ready.push_back(in_flight.task);
            }
        }

        let Some(task) = state.ready.pop_front() else {
            return Ok(None);
        };

        let handle = self.next_handle.fetch_add(1, Ordering::SeqCst).to_string();
        state.in_flight.insert(
            handle.clone(),
            InFlight {
                task: task.clone(),
                visible_at: now + visibility_timeout,
            },
        );

        Ok(Some((DeliveryHandle(handle), task)))
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state
            .in_flight
            .remove(&handle.0)
            .ok_or(QueueError::UnknownDelivery(handle.0))?;
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let in_flight = state
            .in_flight
            .remove(&handle.0)
            .ok_or(QueueError::UnknownDelivery(handle.0))?;
        state.ready.push_back(in_flight.task);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn sample_task() -> NodeTask {
        NodeTask::new(Uuid::new_v4(), "node-a", "http", ChronoDuration::seconds(30))
    }

    #[tokio::test]
    async fn push_then_pop_returns_the_task() {
        let q = MemoryQueue::new();
        q.push(sample_task()).await.unwrap();
        let (_, task) = q.pop(Duration::from_secs(5)).await.unwrap().unwrap();
        assert_eq!(task.node_id, "node-a");
    }

    #[tokio::test]
    async fn pop_on_empty_queue_returns_none() {
        let q = MemoryQueue::new();
        assert!(q.pop(Duration::from_secs(5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nack_makes_the_task_immediately_poppable_again() {
        let q = MemoryQueue::new();
        q.push(sample_task()).await.unwrap();
        let (handle, _) = q.pop(Duration::from_secs(30)).await.unwrap().unwrap();
        q.nack(handle).await.unwrap();
        assert!(q.pop(Duration::from_secs(5)).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn ack_removes_the_task_for_good() {
        let q = MemoryQueue::new();
        q.push(sample_task()).await.unwrap();
        let (handle, _) = q.pop(Duration::from_secs(30)).await.unwrap().unwrap();
        q.ack(handle).await.unwrap();
        assert_eq!(q.len(), 0);
    }

    #[tokio::test]
    async fn expired_visibility_timeout_redelivers() {
        let q = MemoryQueue::new();
        q.push(sample_task()).await.unwrap();
        let (_handle, _) = q.pop(Duration::from_millis(1)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let redelivered = q.pop(Duration::from_secs(5)).await.unwrap();
        assert!(redelivered.is_some());
    }
}
