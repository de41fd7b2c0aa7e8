use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::UploadStatus;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UploadSession {
    pub id: Uuid,
    pub project_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub expected_size_bytes: Option<i64>,
    pub status: UploadStatus,
    pub temp_storage_key: Option<String>,
    pub committed_file_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expires_at < now
    }
}

#[derive(Debug, Error)]
pub enum UploadSessionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct UploadSessionRepository;

impl UploadSessionRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        project_id: Uuid,
        file_name: &str,
        content_type: Option<&str>,
        expected_size_bytes: Option<i64>,
        temp_storage_key: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<UploadSession, UploadSessionError> {
        let record = sqlx::query_as::<_, UploadSession>(
            r#"
            INSERT INTO upload_sessions (
                id, project_id, file_name, content_type, expected_size_bytes,
                status, temp_storage_key, created_at, expires_at
            )
            VALUES (?, ?, ?, ?, ?, 'reserved', ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(file_name)
        .bind(content_type)
        .bind(expected_size_bytes)
        .bind(temp_storage_key)
        .bind(Utc::now())
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<UploadSession>, UploadSessionError> {
        let record = sqlx::query_as::<_, UploadSession>(
            "SELECT * FROM upload_sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    /// Reserved -> Uploading (idempotent for repeated uploads).
    pub async fn mark_uploading(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<bool, UploadSessionError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions SET status = 'uploading'
            WHERE id = ? AND status IN ('reserved', 'uploading')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Uploading -> Committed. Single-writer: exactly one caller wins the
    /// guarded update, the loser sees `false`.
    pub async fn mark_committed<'e, E>(
        executor: E,
        id: Uuid,
        committed_file_id: Uuid,
    ) -> Result<bool, UploadSessionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions
            SET status = 'committed', committed_file_id = ?
            WHERE id = ? AND status = 'uploading'
            "#,
        )
        .bind(committed_file_id)
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(pool: &SqlitePool, id: Uuid) -> Result<bool, UploadSessionError> {
        let result = sqlx::query(
            r#"
            UPDATE upload_sessions SET status = 'failed'
            WHERE id = ? AND status IN ('reserved', 'uploading')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Sweep transition for every overdue non-terminal session. Returns the
    /// expired sessions so the caller can clean up temp bytes.
    pub async fn expire_due(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<Vec<UploadSession>, UploadSessionError> {
        let records = sqlx::query_as::<_, UploadSession>(
            r#"
            UPDATE upload_sessions SET status = 'expired'
            WHERE status IN ('reserved', 'uploading') AND expires_at < ?
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }
}
