//! Membership-based role resolution.

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::memberships::{MembershipError, MembershipRepository},
    db::projects::Project,
    domain::{ProjectRole, WorkspaceRole},
};

pub async fn workspace_role(
    pool: &SqlitePool,
    workspace_id: Uuid,
    user_id: Uuid,
) -> Result<Option<WorkspaceRole>, MembershipError> {
    MembershipRepository::workspace_role(pool, workspace_id, user_id).await
}

/// Direct project membership wins; otherwise the workspace membership is
/// folded down (`Owner`/`Admin` -> `ProjectAdmin`, `Member` -> `Viewer`,
/// `Guest` or none -> no access).
pub async fn effective_project_role(
    pool: &SqlitePool,
    project: &Project,
    user_id: Uuid,
) -> Result<Option<ProjectRole>, MembershipError> {
    if let Some(direct) = MembershipRepository::project_role(pool, project.id, user_id).await? {
        return Ok(Some(direct));
    }

    let workspace = workspace_role(pool, project.workspace_id, user_id).await?;
    Ok(workspace.and_then(WorkspaceRole::implied_project_role))
}
