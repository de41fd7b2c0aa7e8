use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::VersionStatus;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ModelVersion {
    pub id: Uuid,
    pub model_id: Uuid,
    pub version_number: i64,
    pub ifc_file_id: Uuid,
    pub wex_bim_file_id: Option<Uuid>,
    pub properties_file_id: Option<Uuid>,
    pub status: VersionStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum ModelVersionError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ModelVersionRepository;

impl ModelVersionRepository {
    /// Next monotonically-increasing number; call inside the same
    /// transaction as the insert so two writers collide on the unique
    /// constraint instead of silently interleaving.
    pub async fn next_version_number<'e, E>(
        executor: E,
        model_id: Uuid,
    ) -> Result<i64, ModelVersionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version_number), 0) + 1 FROM model_versions WHERE model_id = ?",
        )
        .bind(model_id)
        .fetch_one(executor)
        .await?;
        Ok(next)
    }

    pub async fn create<'e, E>(
        executor: E,
        model_id: Uuid,
        version_number: i64,
        ifc_file_id: Uuid,
    ) -> Result<ModelVersion, ModelVersionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let record = sqlx::query_as::<_, ModelVersion>(
            r#"
            INSERT INTO model_versions (
                id, model_id, version_number, ifc_file_id, status, created_at
            )
            VALUES (?, ?, ?, ?, 'pending', ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(model_id)
        .bind(version_number)
        .bind(ifc_file_id)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<ModelVersion>, ModelVersionError> {
        let record = sqlx::query_as::<_, ModelVersion>(
            "SELECT * FROM model_versions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn list_by_model(
        pool: &SqlitePool,
        model_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ModelVersion>, i64), ModelVersionError> {
        let records = sqlx::query_as::<_, ModelVersion>(
            r#"
            SELECT * FROM model_versions
            WHERE model_id = ?
            ORDER BY version_number DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(model_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM model_versions WHERE model_id = ?")
                .bind(model_id)
                .fetch_one(pool)
                .await?;

        Ok((records, total))
    }

    /// Pending -> Processing. Also succeeds when already Processing (a retry
    /// of an interrupted job) or Failed (a redelivery resurrecting the
    /// version); refuses Ready.
    pub async fn begin_processing(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<bool, ModelVersionError> {
        let result = sqlx::query(
            r#"
            UPDATE model_versions SET status = 'processing', error_message = NULL
            WHERE id = ? AND status IN ('pending', 'processing', 'failed')
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Record the WexBIM artifact. The version flips to Ready only when the
    /// properties artifact is already present; the guard on `status`
    /// prevents lost updates under concurrent workers.
    pub async fn set_wexbim_artifact<'e, E>(
        executor: E,
        id: Uuid,
        file_id: Uuid,
    ) -> Result<bool, ModelVersionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE model_versions SET
                wex_bim_file_id = ?,
                status = CASE WHEN properties_file_id IS NOT NULL THEN 'ready' ELSE status END,
                processed_at = CASE WHEN properties_file_id IS NOT NULL THEN ? ELSE processed_at END
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(file_id)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_properties_artifact<'e, E>(
        executor: E,
        id: Uuid,
        file_id: Uuid,
    ) -> Result<bool, ModelVersionError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let result = sqlx::query(
            r#"
            UPDATE model_versions SET
                properties_file_id = ?,
                status = CASE WHEN wex_bim_file_id IS NOT NULL THEN 'ready' ELSE status END,
                processed_at = CASE WHEN wex_bim_file_id IS NOT NULL THEN ? ELSE processed_at END
            WHERE id = ? AND status = 'processing'
            "#,
        )
        .bind(file_id)
        .bind(Utc::now())
        .bind(id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_failed(
        pool: &SqlitePool,
        id: Uuid,
        error_message: &str,
    ) -> Result<bool, ModelVersionError> {
        let result = sqlx::query(
            r#"
            UPDATE model_versions SET status = 'failed', error_message = ?
            WHERE id = ? AND status IN ('pending', 'processing')
            "#,
        )
        .bind(error_message)
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
