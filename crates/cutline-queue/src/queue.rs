//! FIFO of pending job ids.
//!
//! Popping is a single store primitive. Two schedulers never receive the same
//! id from one push.

use std::collections::VecDeque;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::Mutex;

use cutline_models::JobId;

use crate::config::RedisHandle;
use crate::error::QueueResult;

#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Append a newly submitted job.
    async fn push_back(&self, id: &JobId) -> QueueResult<()>;

    /// Return a job to the head after it was denied a slot.
    async fn push_front(&self, id: &JobId) -> QueueResult<()>;

    /// Atomically remove and return the head.
    async fn pop_front(&self) -> QueueResult<Option<JobId>>;

    /// Remove every occurrence of `id`. Returns whether any was present.
    async fn remove(&self, id: &JobId) -> QueueResult<bool>;

    /// Zero-based position of `id`, if queued.
    async fn position(&self, id: &JobId) -> QueueResult<Option<usize>>;

    async fn len(&self) -> QueueResult<usize>;
}

/// In-process queue.
#[derive(Default)]
pub struct MemoryJobQueue {
    ids: Mutex<VecDeque<JobId>>,
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the queue, head first.
    pub async fn snapshot(&self) -> Vec<JobId> {
        self.ids.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn push_back(&self, id: &JobId) -> QueueResult<()> {
        self.ids.lock().await.push_back(id.clone());
        Ok(())
    }

    async fn push_front(&self, id: &JobId) -> QueueResult<()> {
        self.ids.lock().await.push_front(id.clone());
        Ok(())
    }

    async fn pop_front(&self) -> QueueResult<Option<JobId>> {
        Ok(self.ids.lock().await.pop_front())
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let mut ids = self.ids.lock().await;
        let before = ids.len();
        ids.retain(|queued| queued != id);
        Ok(ids.len() != before)
    }

    async fn position(&self, id: &JobId) -> QueueResult<Option<usize>> {
        Ok(self.ids.lock().await.iter().position(|queued| queued == id))
    }

    async fn len(&self) -> QueueResult<usize> {
        Ok(self.ids.lock().await.len())
    }
}

/// Queue on a Redis list (RPUSH to enqueue, LPOP to dequeue).
#[derive(Clone)]
pub struct RedisJobQueue {
    redis: RedisHandle,
}

impl RedisJobQueue {
    pub fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn push_back(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.redis.conn().await?;
        conn.rpush::<_, _, ()>(self.redis.keys().queue(), id.as_str())
            .await?;
        Ok(())
    }

    async fn push_front(&self, id: &JobId) -> QueueResult<()> {
        let mut conn = self.redis.conn().await?;
        conn.lpush::<_, _, ()>(self.redis.keys().queue(), id.as_str())
            .await?;
        Ok(())
    }

    async fn pop_front(&self) -> QueueResult<Option<JobId>> {
        let mut conn = self.redis.conn().await?;
        let id: Option<String> = conn.lpop(self.redis.keys().queue(), None).await?;
        Ok(id.map(JobId::from))
    }

    async fn remove(&self, id: &JobId) -> QueueResult<bool> {
        let mut conn = self.redis.conn().await?;
        let removed: i64 = conn.lrem(self.redis.keys().queue(), 0, id.as_str()).await?;
        Ok(removed > 0)
    }

    async fn position(&self, id: &JobId) -> QueueResult<Option<usize>> {
        let mut conn = self.redis.conn().await?;
        let position: Option<usize> = redis::cmd("LPOS")
            .arg(self.redis.keys().queue())
            .arg(id.as_str())
            .query_async(&mut conn)
            .await?;
        Ok(position)
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.redis.conn().await?;
        Ok(conn.llen(self.redis.keys().queue()).await?)
    }
}
