use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, QueryBuilder, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{FileCategory, FileKind};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct File {
    pub id: Uuid,
    pub project_id: Uuid,
    pub name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub checksum: Option<String>,
    pub kind: FileKind,
    pub category: FileCategory,
    pub storage_provider: String,
    pub storage_key: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error)]
pub enum FileError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct NewFile<'a> {
    pub project_id: Uuid,
    pub name: &'a str,
    pub content_type: Option<&'a str>,
    pub size_bytes: i64,
    pub checksum: Option<&'a str>,
    pub kind: FileKind,
    pub category: FileCategory,
    pub storage_provider: &'a str,
    pub storage_key: &'a str,
}

pub struct FileRepository;

impl FileRepository {
    pub async fn create<'e, E>(executor: E, file: NewFile<'_>) -> Result<File, FileError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let record = sqlx::query_as::<_, File>(
            r#"
            INSERT INTO files (
                id, project_id, name, content_type, size_bytes, checksum,
                kind, category, storage_provider, storage_key, is_deleted, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(file.project_id)
        .bind(file.name)
        .bind(file.content_type)
        .bind(file.size_bytes)
        .bind(file.checksum)
        .bind(file.kind)
        .bind(file.category)
        .bind(file.storage_provider)
        .bind(file.storage_key)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;

        Ok(record)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<File>, FileError> {
        let record = sqlx::query_as::<_, File>("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(pool)
            .await?;
        Ok(record)
    }

    /// Registry listing: newest first, soft-deleted rows excluded unless the
    /// caller explicitly asks for them.
    pub async fn list_by_project(
        pool: &SqlitePool,
        project_id: Uuid,
        kind: Option<FileKind>,
        category: Option<FileCategory>,
        include_deleted: bool,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<File>, i64), FileError> {
        let mut builder =
            Self::list_query("SELECT * ", project_id, kind, category, include_deleted);
        builder
            .push(" ORDER BY created_at DESC LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);
        let records = builder.build_query_as::<File>().fetch_all(pool).await?;

        let mut builder =
            Self::list_query("SELECT COUNT(*) ", project_id, kind, category, include_deleted);
        let total: i64 = builder.build_query_scalar().fetch_one(pool).await?;

        Ok((records, total))
    }

    fn list_query<'a>(
        select: &str,
        project_id: Uuid,
        kind: Option<FileKind>,
        category: Option<FileCategory>,
        include_deleted: bool,
    ) -> QueryBuilder<'a, Sqlite> {
        let mut builder = QueryBuilder::new(select);
        builder.push("FROM files WHERE project_id = ").push_bind(project_id);
        if let Some(kind) = kind {
            builder.push(" AND kind = ").push_bind(kind);
        }
        if let Some(category) = category {
            builder.push(" AND category = ").push_bind(category);
        }
        if !include_deleted {
            builder.push(" AND is_deleted = 0");
        }
        builder
    }

    /// Guarded soft delete; returns false when the row was already deleted
    /// or does not exist.
    pub async fn soft_delete(pool: &SqlitePool, id: Uuid) -> Result<bool, FileError> {
        let result = sqlx::query(
            "UPDATE files SET is_deleted = 1, deleted_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// True when a link from a non-deleted source still points at this file.
    /// Such a file must not be soft-deleted; once the source is gone its
    /// artifacts become deletable.
    pub async fn has_live_link(pool: &SqlitePool, id: Uuid) -> Result<bool, FileError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1
                FROM file_links l
                INNER JOIN files s ON s.id = l.source_file_id
                WHERE l.target_file_id = ? AND s.is_deleted = 0
            )
            "#,
        )
        .bind(id)
        .fetch_one(pool)
        .await?;
        Ok(exists)
    }
}
