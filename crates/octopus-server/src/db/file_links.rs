use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqliteConnection, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::LinkType;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct FileLink {
    pub id: Uuid,
    pub source_file_id: Uuid,
    pub target_file_id: Uuid,
    pub link_type: LinkType,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FileLinkError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("an identical lineage edge already exists")]
    DuplicateEdge,
    #[error("edge would close a lineage cycle")]
    CycleDetected,
}

pub struct FileLinkRepository;

impl FileLinkRepository {
    /// Insert a lineage edge after enforcing the graph invariants: no
    /// identical edge twice, and no edge that would close a cycle. Runs on
    /// a connection so callers can keep the checks and the insert in one
    /// transaction.
    pub async fn create_checked(
        conn: &mut SqliteConnection,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink, FileLinkError> {
        if Self::edge_exists(&mut *conn, source_file_id, target_file_id, link_type).await? {
            return Err(FileLinkError::DuplicateEdge);
        }
        if Self::would_create_cycle(&mut *conn, source_file_id, target_file_id).await? {
            return Err(FileLinkError::CycleDetected);
        }
        Self::insert(&mut *conn, source_file_id, target_file_id, link_type).await
    }

    async fn insert(
        conn: &mut SqliteConnection,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<FileLink, FileLinkError> {
        let record = sqlx::query_as::<_, FileLink>(
            r#"
            INSERT INTO file_links (id, source_file_id, target_file_id, link_type, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(source_file_id)
        .bind(target_file_id)
        .bind(link_type)
        .bind(Utc::now())
        .fetch_one(conn)
        .await?;

        Ok(record)
    }

    /// Edges touching this file, in either direction.
    pub async fn list_for_file(
        pool: &SqlitePool,
        file_id: Uuid,
    ) -> Result<Vec<FileLink>, FileLinkError> {
        let records = sqlx::query_as::<_, FileLink>(
            r#"
            SELECT * FROM file_links
            WHERE source_file_id = ? OR target_file_id = ?
            ORDER BY created_at
            "#,
        )
        .bind(file_id)
        .bind(file_id)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    async fn edge_exists<'e, E>(
        executor: E,
        source_file_id: Uuid,
        target_file_id: Uuid,
        link_type: LinkType,
    ) -> Result<bool, FileLinkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM file_links
                WHERE source_file_id = ? AND target_file_id = ? AND link_type = ?
            )
            "#,
        )
        .bind(source_file_id)
        .bind(target_file_id)
        .bind(link_type)
        .fetch_one(executor)
        .await?;
        Ok(exists)
    }

    /// Lineage is a DAG: inserting source -> target must be refused when the
    /// source is already reachable by walking edges out of the target.
    async fn would_create_cycle<'e, E>(
        executor: E,
        source_file_id: Uuid,
        target_file_id: Uuid,
    ) -> Result<bool, FileLinkError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        if source_file_id == target_file_id {
            return Ok(true);
        }
        let reachable: bool = sqlx::query_scalar(
            r#"
            WITH RECURSIVE reach(id) AS (
                SELECT target_file_id FROM file_links WHERE source_file_id = ?
                UNION
                SELECT l.target_file_id
                FROM file_links l
                INNER JOIN reach r ON l.source_file_id = r.id
            )
            SELECT EXISTS(SELECT 1 FROM reach WHERE id = ?)
            "#,
        )
        .bind(target_file_id)
        .bind(source_file_id)
        .fetch_one(executor)
        .await?;
        Ok(reachable)
    }
}
