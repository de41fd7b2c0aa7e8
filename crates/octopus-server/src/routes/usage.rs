use axum::{
    extract::{Extension, Path, State},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::{db_error, ErrorResponse},
    load_workspace_for, Access,
};
use crate::{
    auth::RequestContext, db::workspaces::WorkspaceRepository, domain::WorkspaceRole, AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/usage/workspaces/{workspace_id}", get(workspace_usage))
}

#[derive(Debug, Serialize)]
pub struct WorkspaceUsageResponse {
    pub workspace_id: Uuid,
    /// Sum of non-deleted file sizes across every project, computed at
    /// query time from the registry.
    pub used_bytes: i64,
    pub quota_bytes: Option<i64>,
}

#[instrument(name = "usage.workspace", skip(state, ctx), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn workspace_usage(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<WorkspaceUsageResponse>, ErrorResponse> {
    let workspace = load_workspace_for(
        &state,
        &ctx,
        workspace_id,
        WorkspaceRole::Guest,
        Access::Read,
    )
    .await?;

    let used_bytes = WorkspaceRepository::usage_bytes(state.pool(), workspace.id)
        .await
        .map_err(|e| db_error(e, "failed to compute usage"))?;

    Ok(Json(WorkspaceUsageResponse {
        workspace_id: workspace.id,
        used_bytes,
        quota_bytes: workspace
            .quota_bytes
            .or(state.config().workspace_quota_bytes),
    }))
}
