use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::CodeChallengeMethod;

/// Stored authorization-code grant. Only the SHA-256 hash of the code ever
/// touches the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthCode {
    pub id: Uuid,
    pub code_hash: String,
    pub oauth_app_id: Uuid,
    pub user_id: Uuid,
    pub workspace_id: Uuid,
    pub scopes: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum AuthCodeError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct AuthCodeRepository;

impl AuthCodeRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        code_hash: &str,
        oauth_app_id: Uuid,
        user_id: Uuid,
        workspace_id: Uuid,
        scopes: &str,
        redirect_uri: &str,
        code_challenge: Option<&str>,
        code_challenge_method: Option<CodeChallengeMethod>,
        expires_at: DateTime<Utc>,
    ) -> Result<AuthCode, AuthCodeError> {
        let record = sqlx::query_as::<_, AuthCode>(
            r#"
            INSERT INTO auth_codes (
                id, code_hash, oauth_app_id, user_id, workspace_id, scopes,
                redirect_uri, code_challenge, code_challenge_method,
                created_at, expires_at, is_used
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(code_hash)
        .bind(oauth_app_id)
        .bind(user_id)
        .bind(workspace_id)
        .bind(scopes)
        .bind(redirect_uri)
        .bind(code_challenge)
        .bind(code_challenge_method)
        .bind(Utc::now())
        .bind(expires_at)
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_for_app(
        pool: &SqlitePool,
        code_hash: &str,
        oauth_app_id: Uuid,
    ) -> Result<Option<AuthCode>, AuthCodeError> {
        let record = sqlx::query_as::<_, AuthCode>(
            "SELECT * FROM auth_codes WHERE code_hash = ? AND oauth_app_id = ?",
        )
        .bind(code_hash)
        .bind(oauth_app_id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    /// Single-use enforcement: exactly one caller flips `is_used`; a replay
    /// sees `false`.
    pub async fn consume(pool: &SqlitePool, id: Uuid) -> Result<bool, AuthCodeError> {
        let result = sqlx::query(
            "UPDATE auth_codes SET is_used = 1, used_at = ? WHERE id = ? AND is_used = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Housekeeping for the sweeper: drop codes past their TTL.
    pub async fn delete_expired(
        pool: &SqlitePool,
        now: DateTime<Utc>,
    ) -> Result<u64, AuthCodeError> {
        let result = sqlx::query("DELETE FROM auth_codes WHERE expires_at < ?")
            .bind(now)
            .execute(pool)
            .await?;
        Ok(result.rows_affected())
    }
}
