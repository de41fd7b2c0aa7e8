use chrono::{DateTime, Utc};
use sqlx::{Executor, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

/// Durable queue row. Lifecycle: `queued` -> `running` -> gone (success),
/// back to `queued` (retry/cancel), or `failed` (terminal).
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: Uuid,
    pub job_type: String,
    pub payload: String,
    pub status: String,
    pub attempt: i64,
    pub run_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub const JOB_STATUS_QUEUED: &str = "queued";
pub const JOB_STATUS_RUNNING: &str = "running";
pub const JOB_STATUS_FAILED: &str = "failed";

#[derive(Debug, Error)]
pub enum JobError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct JobRepository;

impl JobRepository {
    /// Insert a queued job. Runs on any executor so callers can enqueue
    /// inside the transaction that creates the work — the outbox guarantee.
    pub async fn enqueue<'e, E>(
        executor: E,
        job_type: &str,
        payload: &str,
    ) -> Result<Job, JobError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let record = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, job_type, payload, status, attempt, run_at, enqueued_at, updated_at)
            VALUES (?, ?, ?, 'queued', 0, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(job_type)
        .bind(payload)
        .bind(now)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await?;

        Ok(record)
    }

    /// Claim the next due job. The single UPDATE makes the claim atomic:
    /// two workers cannot take the same row.
    pub async fn claim_next(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, JobError> {
        let record = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs SET status = 'running', updated_at = ?
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'queued' AND run_at <= ?
                ORDER BY run_at, enqueued_at
                LIMIT 1
            )
            RETURNING *
            "#,
        )
        .bind(now)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    pub async fn complete(pool: &SqlitePool, id: Uuid) -> Result<(), JobError> {
        sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Put a job back with a new attempt count and earliest run time.
    pub async fn requeue(
        pool: &SqlitePool,
        id: Uuid,
        attempt: i64,
        run_at: DateTime<Utc>,
        last_error: Option<&str>,
    ) -> Result<(), JobError> {
        sqlx::query(
            r#"
            UPDATE jobs SET status = 'queued', attempt = ?, run_at = ?, last_error = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempt)
        .bind(run_at)
        .bind(last_error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn fail(pool: &SqlitePool, id: Uuid, last_error: &str) -> Result<(), JobError> {
        sqlx::query(
            "UPDATE jobs SET status = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(last_error)
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Crash recovery at startup: anything still `running` belonged to a
    /// dead worker and goes back on the queue.
    pub async fn requeue_stale_running(pool: &SqlitePool) -> Result<u64, JobError> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'queued', updated_at = ? WHERE status = 'running'",
        )
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Queued backlog depth, reported as a gauge by the workers.
    pub async fn backlog(pool: &SqlitePool) -> Result<i64, JobError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE status = 'queued'")
                .fetch_one(pool)
                .await?;
        Ok(count)
    }
}
