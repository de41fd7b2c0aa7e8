use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Workspace {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub quota_bytes: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct WorkspaceRepository;

impl WorkspaceRepository {
    pub async fn create<'e, E>(
        executor: E,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
    ) -> Result<Workspace, WorkspaceError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let now = Utc::now();
        let record = sqlx::query_as::<_, Workspace>(
            r#"
            INSERT INTO workspaces (id, name, description, quota_bytes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(description)
        .bind(quota_bytes)
        .bind(now)
        .bind(now)
        .fetch_one(executor)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(
        pool: &SqlitePool,
        id: Uuid,
    ) -> Result<Option<Workspace>, WorkspaceError> {
        let record = sqlx::query_as::<_, Workspace>("SELECT * FROM workspaces WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    pub async fn update(
        pool: &SqlitePool,
        id: Uuid,
        name: &str,
        description: Option<&str>,
        quota_bytes: Option<i64>,
    ) -> Result<Option<Workspace>, WorkspaceError> {
        let record = sqlx::query_as::<_, Workspace>(
            r#"
            UPDATE workspaces
            SET name = ?, description = ?, quota_bytes = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(quota_bytes)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await?;

        Ok(record)
    }

    /// Workspaces the user is a member of, newest first.
    pub async fn list_for_user(
        pool: &SqlitePool,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Workspace>, i64), WorkspaceError> {
        let records = sqlx::query_as::<_, Workspace>(
            r#"
            SELECT w.*
            FROM workspaces w
            INNER JOIN workspace_members m ON m.workspace_id = w.id
            WHERE m.user_id = ?
            ORDER BY w.created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workspace_members WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;

        Ok((records, total))
    }

    /// Storage accounting is derived from the registry, never tracked as a
    /// counter: the sum of non-deleted file sizes across all projects.
    pub async fn usage_bytes(pool: &SqlitePool, id: Uuid) -> Result<i64, WorkspaceError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(f.size_bytes), 0)
            FROM files f
            INNER JOIN projects p ON p.id = f.project_id
            WHERE p.workspace_id = ? AND f.is_deleted = 0
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;

        Ok(total)
    }
}
