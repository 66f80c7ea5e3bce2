//! Redis-backed `DispatchQueue`.
//!
//! Ready tasks live in a list (`{prefix}:ready`); a popped task is moved
//! into a processing hash (`{prefix}:processing`) plus a sorted set
//! (`{prefix}:visible_at`) scored by the Unix timestamp at which its
//! visibility timeout expires. `pop` first reclaims anything whose score
//! has passed, then pops the next ready task — the classic reliable-queue
//! pattern built on primitives Redis gives you directly, rather than a
//! blocking `BRPOPLPUSH` (which can't express per-consumer ack/nack).

use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

use crate::{DeliveryHandle, DispatchQueue, NodeTask, QueueError};

pub struct RedisQueue {
    conn: ConnectionManager,
    ready_key: String,
    processing_key: String,
    visible_at_key: String,
}

impl RedisQueue {
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            ready_key: format!("flowsmith:{queue_name}:ready"),
            processing_key: format!("flowsmith:{queue_name}:processing"),
            visible_at_key: format!("flowsmith:{queue_name}:visible_at"),
        })
    }

    /// Move any processing entries whose visibility timeout has expired
    /// back onto the ready list.
    async fn reclaim_expired(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp() as f64;

        let expired: Vec<String> = conn
            .zrangebyscore(&self.visible_at_key, f64::NEG_INFINITY, now)
            .await?;

        for handle in expired {
            let payload: Option<String> = conn.hget(&self.processing_key, &handle).await?;
            if let Some(payload) = payload {
                let _: () = conn.lpush(&self.ready_key, payload).await?;
            }
            let _: () = conn.hdel(&self.processing_key, &handle).await?;
            let _: () = conn.zrem(&self.visible_at_key, &handle).await?;
        }

        Ok(())
    }
}

#[async_trait]
impl DispatchQueue for RedisQueue {
    async fn push(&self, task: NodeTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&task)?;
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(&self.ready_key, payload).await?;
        Ok(())
    }

    async fn pop(
        &self,
        visibility_timeout: Duration,
    ) -> Result<Option<(DeliveryHandle, NodeTask)>, QueueError> {
        self.reclaim_expired().await?;

        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.rpop(&self.ready_key, None).await?;
        let Some(payload) = payload else {
            return Ok(None);
        };

        let task: NodeTask = serde_json::from_str(&payload)?;
        let handle = Uuid::new_v4().to_string();
        let visible_at = (Utc::now() + chrono::Duration::from_std(visibility_timeout).unwrap_or_default())
            .timestamp() as f64;

        let _: () = conn.hset(&self.processing_key, &handle, &payload).await?;
        let _: () = conn.zadd(&self.visible_at_key, &handle, visible_at).await?;

        Ok(Some((DeliveryHandle(handle), task)))
    }

    async fn ack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: () = conn.hdel(&self.processing_key, &handle.0).await?;
        let _: () = conn.zrem(&self.visible_at_key, &handle.0).await?;
        Ok(())
    }

    async fn nack(&self, handle: DeliveryHandle) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let payload: Option<String> = conn.hget(&self.processing_key, &handle.0).await?;
        let payload = payload.ok_or_else(|| QueueError::UnknownDelivery(handle.0.clone()))?;

        let _: () = conn.lpush(&self.ready_key, payload).await?;
        let _: () = conn.hdel(&self.processing_key, &handle.0).await?;
        let _: () = conn.zrem(&self.visible_at_key, &handle.0).await?;
        Ok(())
    }
}
