use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ProjectRepository;

impl ProjectRepository {
    pub async fn create(
        pool: &SqlitePool,
        workspace_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Project, ProjectError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (id, workspace_id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Project>, ProjectError> {
        let record = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = ?")
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
    ) -> Result<Option<Project>, ProjectError> {
        let record = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects SET name = ?, description = ?, updated_at = ?
            WHERE id = ?
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Project>, i64), ProjectError> {
        let records = sqlx::query_as::<_, Project>(
            r#"
            SELECT * FROM projects
            WHERE workspace_id = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(workspace_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projects WHERE workspace_id = ?")
            .bind(workspace_id)
            .fetch_one(pool)
            .await?;

        Ok((records, total))
    }
}
