use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Executor, Sqlite, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ProjectRole, WorkspaceRole};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct WorkspaceMember {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub user_id: Uuid,
    pub role: WorkspaceRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectMember {
    pub id: Uuid,
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: ProjectRole,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub struct MembershipRepository;

impl MembershipRepository {
    pub async fn add_workspace_member<'e, E>(
        executor: E,
        workspace_id: Uuid,
        user_id: Uuid,
        role: WorkspaceRole,
    ) -> Result<WorkspaceMember, MembershipError>
    where
        E: Executor<'e, Database = Sqlite>,
    {
        let record = sqlx::query_as::<_, WorkspaceMember>(
            r#"
            INSERT INTO workspace_members (id, workspace_id, user_id, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(executor)
        .await?;

        Ok(record)
    }

    pub async fn workspace_role(
        pool: &SqlitePool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<WorkspaceRole>, MembershipError> {
        let role = sqlx::query_scalar::<_, WorkspaceRole>(
            "SELECT role FROM workspace_members WHERE workspace_id = ? AND user_id = ?",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(role)
    }

    pub async fn list_workspace_members(
        pool: &SqlitePool,
        workspace_id: Uuid,
    ) -> Result<Vec<WorkspaceMember>, MembershipError> {
        let records = sqlx::query_as::<_, WorkspaceMember>(
            "SELECT * FROM workspace_members WHERE workspace_id = ? ORDER BY created_at",
        )
        .bind(workspace_id)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    pub async fn count_workspace_owners(
        pool: &SqlitePool,
        workspace_id: Uuid,
    ) -> Result<i64, MembershipError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workspace_members WHERE workspace_id = ? AND role = 'owner'",
        )
        .bind(workspace_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn remove_workspace_member(
        pool: &SqlitePool,
        workspace_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, MembershipError> {
        let result =
            sqlx::query("DELETE FROM workspace_members WHERE workspace_id = ? AND user_id = ?")
                .bind(workspace_id)
                .bind(user_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn add_project_member(
        pool: &SqlitePool,
        project_id: Uuid,
        user_id: Uuid,
        role: ProjectRole,
    ) -> Result<ProjectMember, MembershipError> {
        let record = sqlx::query_as::<_, ProjectMember>(
            r#"
            INSERT INTO project_members (id, project_id, user_id, role, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(project_id)
        .bind(user_id)
        .bind(role)
        .bind(Utc::now())
        .fetch_one(pool)
        .await?;

        Ok(record)
    }

    pub async fn project_role(
        pool: &SqlitePool,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<ProjectRole>, MembershipError> {
        let role = sqlx::query_scalar::<_, ProjectRole>(
            "SELECT role FROM project_members WHERE project_id = ? AND user_id = ?",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;

        Ok(role)
    }

    pub async fn list_project_members(
        pool: &SqlitePool,
        project_id: Uuid,
    ) -> Result<Vec<ProjectMember>, MembershipError> {
        let records = sqlx::query_as::<_, ProjectMember>(
            "SELECT * FROM project_members WHERE project_id = ? ORDER BY created_at",
        )
        .bind(project_id)
        .fetch_all(pool)
        .await?;
        Ok(records)
    }

    pub async fn remove_project_member(
        pool: &SqlitePool,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<bool, MembershipError> {
        let result =
            sqlx::query("DELETE FROM project_members WHERE project_id = ? AND user_id = ?")
                .bind(project_id)
                .bind(user_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}
