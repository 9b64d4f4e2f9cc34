//! Job records.
//!
//! The store is the single source of truth for job status. Every status
//! change is a compare-and-set against the current status, so a terminal
//! status is never overwritten and progress never moves backward.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::{AsyncCommands, Script};
use tokio::sync::Mutex;

use cutline_models::{ArtifactRef, JobId, JobStatus, RenderJob, CANCELLED_REASON};

use crate::config::RedisHandle;
use crate::error::{QueueError, QueueResult};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new pending job.
    async fn insert(&self, job: &RenderJob) -> QueueResult<()>;

    async fn get(&self, id: &JobId) -> QueueResult<Option<RenderJob>>;

    /// pending -> processing under `lease_token`.
    async fn mark_processing(&self, id: &JobId, lease_token: &str) -> QueueResult<RenderJob>;

    /// Raise progress of a processing job. Returns whether it changed.
    async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<bool>;

    /// processing -> completed.
    async fn complete(&self, id: &JobId, output: &ArtifactRef) -> QueueResult<RenderJob>;

    /// pending|processing -> failed.
    async fn fail(&self, id: &JobId, error: &str) -> QueueResult<RenderJob>;

    /// pending -> failed with the cancellation reason.
    async fn cancel(&self, id: &JobId) -> QueueResult<RenderJob>;

    /// Append an operator note to a terminal job. Returns whether it applied.
    async fn annotate(&self, id: &JobId, note: &str) -> QueueResult<bool>;

    /// Jobs currently marked processing.
    async fn list_processing(&self) -> QueueResult<Vec<RenderJob>>;

    /// Readiness check.
    async fn ping(&self) -> QueueResult<()>;
}

/// In-process job store.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: Mutex<HashMap<JobId, RenderJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored record, in no particular order.
    pub async fn snapshot(&self) -> Vec<RenderJob> {
        self.jobs.lock().await.values().cloned().collect()
    }

    async fn update<F>(&self, id: &JobId, apply: F) -> QueueResult<RenderJob>
    where
        F: FnOnce(&mut RenderJob) -> Result<(), cutline_models::TransitionError> + Send,
    {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::not_found(id))?;
        apply(job).map_err(|e| QueueError::from_transition(id, e))?;
        Ok(job.clone())
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &RenderJob) -> QueueResult<()> {
        self.jobs.lock().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<RenderJob>> {
        Ok(self.jobs.lock().await.get(id).cloned())
    }

    async fn mark_processing(&self, id: &JobId, lease_token: &str) -> QueueResult<RenderJob> {
        let lease_token = lease_token.to_string();
        self.update(id, move |job| job.start(lease_token)).await
    }

    async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::not_found(id))?;
        Ok(job.set_progress(progress))
    }

    async fn complete(&self, id: &JobId, output: &ArtifactRef) -> QueueResult<RenderJob> {
        let output = output.clone();
        self.update(id, move |job| job.complete(output)).await
    }

    async fn fail(&self, id: &JobId, error: &str) -> QueueResult<RenderJob> {
        let error = error.to_string();
        self.update(id, move |job| job.fail(error)).await
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<RenderJob> {
        self.update(id, |job| job.cancel()).await
    }

    async fn annotate(&self, id: &JobId, note: &str) -> QueueResult<bool> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs.get_mut(id).ok_or_else(|| QueueError::not_found(id))?;
        Ok(job.annotate(note))
    }

    async fn list_processing(&self) -> QueueResult<Vec<RenderJob>> {
        Ok(self
            .jobs
            .lock()
            .await
            .values()
            .filter(|job| job.status == JobStatus::Processing)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> QueueResult<()> {
        Ok(())
    }
}

const TRANSITION_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
    return {-1, ''}
end
local allowed = false
for s in string.gmatch(ARGV[1], '[^,]+') do
    if s == status then
        allowed = true
    end
end
if not allowed then
    return {0, status}
end
redis.call('HSET', KEYS[1], 'status', ARGV[2])
for i = 5, #ARGV, 2 do
    redis.call('HSET', KEYS[1], ARGV[i], ARGV[i + 1])
end
if ARGV[2] == 'processing' then
    redis.call('SADD', KEYS[2], ARGV[3])
else
    redis.call('SREM', KEYS[2], ARGV[3])
    local retention = tonumber(ARGV[4])
    if retention > 0 then
        redis.call('EXPIRE', KEYS[1], retention)
    end
end
return {1, ARGV[2]}
"#;

const PROGRESS_SCRIPT: &str = r#"
if redis.call('HGET', KEYS[1], 'status') ~= 'processing' then
    return 0
end
local current = tonumber(redis.call('HGET', KEYS[1], 'progress') or '0')
local wanted = tonumber(ARGV[1])
if wanted <= current then
    return 0
end
redis.call('HSET', KEYS[1], 'progress', ARGV[1], 'updated_at', ARGV[2])
return 1
"#;

const ANNOTATE_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if status ~= 'completed' and status ~= 'failed' then
    return 0
end
local existing = redis.call('HGET', KEYS[1], 'error')
if existing and existing ~= '' then
    redis.call('HSET', KEYS[1], 'error', existing .. '; ' .. ARGV[1])
else
    redis.call('HSET', KEYS[1], 'error', ARGV[1])
end
redis.call('HSET', KEYS[1], 'updated_at', ARGV[2])
return 1
"#;

/// Job store on Redis hashes, one per job, plus a set of processing ids.
pub struct RedisJobStore {
    redis: RedisHandle,
    retention_secs: u64,
    transition: Script,
    progress: Script,
    annotate: Script,
}

impl RedisJobStore {
    pub fn new(redis: RedisHandle, retention: std::time::Duration) -> Self {
        Self {
            redis,
            retention_secs: retention.as_secs(),
            transition: Script::new(TRANSITION_SCRIPT),
            progress: Script::new(PROGRESS_SCRIPT),
            annotate: Script::new(ANNOTATE_SCRIPT),
        }
    }

    async fn transition(
        &self,
        id: &JobId,
        from: &[JobStatus],
        to: JobStatus,
        fields: Vec<(&'static str, String)>,
    ) -> QueueResult<RenderJob> {
        let mut conn = self.redis.conn().await?;
        let allowed: Vec<&str> = from.iter().map(JobStatus::as_str).collect();

        let mut invocation = self.transition.prepare_invoke();
        invocation
            .key(self.redis.keys().job(id))
            .key(self.redis.keys().processing())
            .arg(allowed.join(","))
            .arg(to.as_str())
            .arg(id.as_str())
            .arg(self.retention_secs);
        for (field, value) in &fields {
            invocation.arg(*field).arg(value);
        }

        let (outcome, status): (i64, String) = invocation.invoke_async(&mut conn).await?;
        match outcome {
            1 => self.get(id).await?.ok_or_else(|| QueueError::not_found(id)),
            0 => {
                let current = JobStatus::parse(&status)
                    .ok_or_else(|| QueueError::corrupt(id, format!("unknown status {}", status)))?;
                Err(QueueError::conflict(id, current))
            }
            _ => Err(QueueError::not_found(id)),
        }
    }
}

#[async_trait]
impl JobStore for RedisJobStore {
    async fn insert(&self, job: &RenderJob) -> QueueResult<()> {
        let mut conn = self.redis.conn().await?;
        let fields = job_to_fields(job)?;
        conn.hset_multiple::<_, _, _, ()>(self.redis.keys().job(&job.id), fields.as_slice())
            .await?;
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<RenderJob>> {
        let mut conn = self.redis.conn().await?;
        let fields: HashMap<String, String> = conn.hgetall(self.redis.keys().job(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        job_from_fields(id, fields).map(Some)
    }

    async fn mark_processing(&self, id: &JobId, lease_token: &str) -> QueueResult<RenderJob> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            id,
            &[JobStatus::Pending],
            JobStatus::Processing,
            vec![
                ("lease_token", lease_token.to_string()),
                ("started_at", now.clone()),
                ("updated_at", now),
            ],
        )
        .await
    }

    async fn update_progress(&self, id: &JobId, progress: u8) -> QueueResult<bool> {
        let mut conn = self.redis.conn().await?;
        let changed: i32 = self
            .progress
            .key(self.redis.keys().job(id))
            .arg(progress.min(100))
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(changed == 1)
    }

    async fn complete(&self, id: &JobId, output: &ArtifactRef) -> QueueResult<RenderJob> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            id,
            &[JobStatus::Processing],
            JobStatus::Completed,
            vec![
                ("progress", "100".to_string()),
                ("output", serde_json::to_string(output)?),
                ("completed_at", now.clone()),
                ("updated_at", now),
            ],
        )
        .await
    }

    async fn fail(&self, id: &JobId, error: &str) -> QueueResult<RenderJob> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            id,
            &[JobStatus::Pending, JobStatus::Processing],
            JobStatus::Failed,
            vec![
                ("error", error.to_string()),
                ("completed_at", now.clone()),
                ("updated_at", now),
            ],
        )
        .await
    }

    async fn cancel(&self, id: &JobId) -> QueueResult<RenderJob> {
        let now = Utc::now().to_rfc3339();
        self.transition(
            id,
            &[JobStatus::Pending],
            JobStatus::Failed,
            vec![
                ("error", CANCELLED_REASON.to_string()),
                ("completed_at", now.clone()),
                ("updated_at", now),
            ],
        )
        .await
    }

    async fn annotate(&self, id: &JobId, note: &str) -> QueueResult<bool> {
        let mut conn = self.redis.conn().await?;
        let applied: i32 = self
            .annotate
            .key(self.redis.keys().job(id))
            .arg(note)
            .arg(Utc::now().to_rfc3339())
            .invoke_async(&mut conn)
            .await?;
        Ok(applied == 1)
    }

    async fn list_processing(&self) -> QueueResult<Vec<RenderJob>> {
        let mut conn = self.redis.conn().await?;
        let ids: Vec<String> = conn.smembers(self.redis.keys().processing()).await?;

        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.get(&JobId::from(id)).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn ping(&self) -> QueueResult<()> {
        self.redis.ping().await
    }
}

fn job_to_fields(job: &RenderJob) -> QueueResult<Vec<(&'static str, String)>> {
    let mut fields = vec![
        ("id", job.id.to_string()),
        ("status", job.status.as_str().to_string()),
        ("progress", job.progress.to_string()),
        ("document", serde_json::to_string(&job.document)?),
        ("created_at", job.created_at.to_rfc3339()),
        ("updated_at", job.updated_at.to_rfc3339()),
        ("consumed_sources", serde_json::to_string(&job.consumed_sources)?),
    ];
    if let Some(started_at) = job.started_at {
        fields.push(("started_at", started_at.to_rfc3339()));
    }
    if let Some(completed_at) = job.completed_at {
        fields.push(("completed_at", completed_at.to_rfc3339()));
    }
    if let Some(error) = &job.error {
        fields.push(("error", error.clone()));
    }
    if let Some(output) = &job.output {
        fields.push(("output", serde_json::to_string(output)?));
    }
    if let Some(lease_token) = &job.lease_token {
        fields.push(("lease_token", lease_token.clone()));
    }
    Ok(fields)
}

fn job_from_fields(id: &JobId, mut fields: HashMap<String, String>) -> QueueResult<RenderJob> {
    let mut take = |name: &str| fields.remove(name);
    let required = |value: Option<String>, name: &str| {
        value.ok_or_else(|| QueueError::corrupt(id, format!("missing field {}", name)))
    };
    let timestamp = |value: String| -> QueueResult<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&value)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| QueueError::corrupt(id, format!("bad timestamp {}: {}", value, e)))
    };

    let status_text = required(take("status"), "status")?;
    let status = JobStatus::parse(&status_text)
        .ok_or_else(|| QueueError::corrupt(id, format!("unknown status {}", status_text)))?;
    let document = serde_json::from_str(&required(take("document"), "document")?)?;
    let created_at = timestamp(required(take("created_at"), "created_at")?)?;
    let updated_at = timestamp(required(take("updated_at"), "updated_at")?)?;
    let progress = take("progress")
        .and_then(|p| p.parse::<u8>().ok())
        .unwrap_or(0);
    let started_at = take("started_at").map(timestamp).transpose()?;
    let completed_at = take("completed_at").map(timestamp).transpose()?;
    let output = take("output")
        .map(|o| serde_json::from_str::<ArtifactRef>(&o))
        .transpose()?;
    let consumed_sources = take("consumed_sources")
        .map(|c| serde_json::from_str::<Vec<String>>(&c))
        .transpose()?
        .unwrap_or_default();

    Ok(RenderJob {
        id: id.clone(),
        document,
        status,
        progress,
        created_at,
        updated_at,
        started_at,
        completed_at,
        error: take("error"),
        output,
        consumed_sources,
        lease_token: take("lease_token"),
    })
}
