use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ClientType;

/// Registered OAuth2 client. `redirect_uris` and `allowed_scopes` are stored
/// space-separated (URIs and scope tokens cannot contain spaces).
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct OAuthApp {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret_hash: Option<String>,
    pub client_type: ClientType,
    pub redirect_uris: String,
    pub allowed_scopes: String,
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl OAuthApp {
    pub fn redirect_uri_list(&self) -> Vec<&str> {
        self.redirect_uris.split_whitespace().collect()
    }

    pub fn scope_list(&self) -> Vec<&str> {
        self.allowed_scopes.split_whitespace().collect()
    }
}

#[derive(Debug, Error)]
pub enum OAuthAppError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct OAuthAppRepository;

impl OAuthAppRepository {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &SqlitePool,
        workspace_id: Uuid,
        name: &str,
        client_id: &str,
        client_secret_hash: Option<&str>,
        client_type: ClientType,
        redirect_uris: &str,
        allowed_scopes: &str,
    ) -> Result<OAuthApp, OAuthAppError> {
        let record = sqlx::query_as::<_, OAuthApp>(
            r#"
            INSERT INTO oauth_apps (
                id, workspace_id, name, client_id, client_secret_hash,
                client_type, redirect_uris, allowed_scopes, is_enabled, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(name)
        .bind(client_id)
        .bind(client_secret_hash)
        .bind(client_type)
        .bind(redirect_uris)
        .bind(allowed_scopes)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn find_by_client_id(
        pool: &SqlitePool,
        client_id: &str,
    ) -> Result<Option<OAuthApp>, OAuthAppError> {
        let record = sqlx::query_as::<_, OAuthApp>(
            "SELECT * FROM oauth_apps WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(pool)
        .await?;
        Ok(record)
    }

    pub async fn list_by_workspace(
        pool: &SqlitePool,
        workspace_id: Uuid,
    ) -> Result<Vec<OAuthApp>, OAuthAppError> {
        let records = sqlx::query_as::<_, OAuthApp>(
            "SELECT * FROM oauth_apps WHERE workspace_id = ? ORDER BY created_at",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }
}
