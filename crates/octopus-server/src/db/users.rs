use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum UserError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct UserRepository;

impl UserRepository {
    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<User>, UserError> {
        let record = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    pub async fn find_by_subject(
        pool: &SqlitePool,
        subject: &str,
    ) -> Result<Option<User>, UserError> {
        let record = sqlx::query_as::<_, User>("SELECT * FROM users WHERE subject = ?")
            .bind(subject)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    /// Auto-provisioning: fetch the row for `subject`, creating it on first
    /// sight. Concurrent first requests race benignly through the upsert.
    pub async fn get_or_provision(
        pool: &SqlitePool,
        subject: &str,
        email: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<User, UserError> {
        let now = Utc::now();
        let record = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, subject, email, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (subject) DO UPDATE SET
                email = COALESCE(excluded.email, email),
                display_name = COALESCE(excluded.display_name, display_name),
                updated_at = excluded.updated_at
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(subject)
        .bind(email)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }
}
