use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Model {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct ModelRepository;

impl ModelRepository {
    pub async fn create(
        pool: &SqlitePool,
        project_id: Uuid,
        name: &str,
        description: Option<&str>,
    ) -> Result<Model, ModelError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, Model>(
            r#"
            INSERT INTO models (id, project_id, name, description, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(name)
        .bind(description)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Model>, ModelError> {
        let record = sqlx::query_as::<_, Model>("SELECT * FROM models WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Model>, i64), ModelError> {
        let records = sqlx::query_as::<_, Model>(
            r#"
            SELECT * FROM models
            WHERE project_id = ?
            ORDER BY created_at DESC
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(project_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM models WHERE project_id = ?")
            .bind(project_id)
            .fetch_one(pool)
            .await?;

        Ok((records, total))
    }
}
