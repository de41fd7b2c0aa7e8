//! Job queue contract and the database-backed default.
//!
//! Delivery is at-least-once; handlers are idempotent. The database
//! implementation doubles as a durable outbox: producers that need
//! transactional enqueue insert through `JobRepository::enqueue` on their
//! own open transaction, and workers drain through this interface.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db::jobs::{Job, JobError, JobRepository};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(#[from] JobError),
}

/// One delivery of a job.
#[derive(Debug, Clone)]
pub struct JobEnvelope {
    pub job_id: Uuid,
    pub job_type: String,
    pub payload: String,
    pub enqueued_at: chrono::DateTime<Utc>,
    pub attempt: u32,
}

impl From<Job> for JobEnvelope {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            job_type: job.job_type,
            payload: job.payload,
            enqueued_at: job.enqueued_at,
            attempt: job.attempt as u32,
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job_type: &str, payload: &str) -> Result<JobEnvelope, QueueError>;

    /// Claim the next due job, or `None` when the queue is idle.
    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError>;

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError>;

    /// Schedule a redelivery after `delay` with the given attempt counter.
    async fn retry(
        &self,
        job_id: Uuid,
        attempt: u32,
        delay: Duration,
        error: Option<&str>,
    ) -> Result<(), QueueError>;

    /// Terminal failure.
    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), QueueError>;

    /// Queued backlog depth.
    async fn backlog(&self) -> Result<i64, QueueError>;
}

pub struct SqliteJobQueue {
    pool: SqlitePool,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobQueue for SqliteJobQueue {
    async fn enqueue(&self, job_type: &str, payload: &str) -> Result<JobEnvelope, QueueError> {
        let job = JobRepository::enqueue(&self.pool, job_type, payload).await?;
        Ok(job.into())
    }

    async fn dequeue(&self) -> Result<Option<JobEnvelope>, QueueError> {
        let job = JobRepository::claim_next(&self.pool, Utc::now()).await?;
        Ok(job.map(Into::into))
    }

    async fn complete(&self, job_id: Uuid) -> Result<(), QueueError> {
        JobRepository::complete(&self.pool, job_id).await?;
        Ok(())
    }

    async fn retry(
        &self,
        job_id: Uuid,
        attempt: u32,
        delay: Duration,
        error: Option<&str>,
    ) -> Result<(), QueueError> {
        let run_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
        JobRepository::requeue(&self.pool, job_id, attempt as i64, run_at, error).await?;
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<(), QueueError> {
        JobRepository::fail(&self.pool, job_id, error).await?;
        Ok(())
    }

    async fn backlog(&self) -> Result<i64, QueueError> {
        Ok(JobRepository::backlog(&self.pool).await?)
    }
}
