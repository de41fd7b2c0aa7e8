pub mod error;
pub mod files;
pub mod models;
pub mod oauth;
pub mod projects;
pub mod usage;
pub mod workspaces;

use axum::{middleware, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{
        self,
        rbac,
        scopes::{SCOPE_READ, SCOPE_WRITE},
        RequestContext,
    },
    db::projects::{Project, ProjectRepository},
    db::workspaces::{Workspace, WorkspaceRepository},
    domain::{ProjectRole, WorkspaceRole},
    AppState,
};
use error::ErrorResponse;

/// The full HTTP surface: versioned API behind the principal middleware,
/// OAuth2 endpoints beside it (`/oauth/token` is anonymous by design).
pub fn app_router(state: AppState) -> Router {
    let api = Router::new()
        .merge(workspaces::router())
        .merge(projects::router())
        .merge(files::router())
        .merge(models::router())
        .merge(usage::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ));

    Router::new()
        .nest("/api/v1", api)
        .nest("/oauth", oauth::router(state.clone()))
        .with_state(state)
}

// ── Pagination ──────────────────────────────────────────────────────────────

pub const MAX_PAGE_SIZE: i64 = 100;
pub const DEFAULT_PAGE_SIZE: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl PageParams {
    /// Clamp to `page >= 1`, `page_size in [1, 100]`.
    pub fn normalize(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let page_size = self
            .page_size
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);
        (page, page_size)
    }

    pub fn limit_offset(&self) -> (i64, i64) {
        let (page, page_size) = self.normalize();
        (page_size, (page - 1) * page_size)
    }
}

#[derive(Debug, Serialize)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

impl<T> Paged<T> {
    pub fn new(items: Vec<T>, params: &PageParams, total: i64) -> Self {
        let (page, page_size) = params.normalize();
        Self {
            items,
            page,
            page_size,
            total,
        }
    }
}

// ── Access checks ───────────────────────────────────────────────────────────

/// Read denials hide the resource (404); write denials are explicit (403).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// Scope gate, orthogonal to the role gate.
pub(crate) fn require_scope(ctx: &RequestContext, access: Access) -> Result<(), ErrorResponse> {
    let scope = match access {
        Access::Read => SCOPE_READ,
        Access::Write => SCOPE_WRITE,
    };
    if ctx.scopes.has(scope) {
        Ok(())
    } else {
        Err(ErrorResponse::forbidden(format!(
            "token lacks the `{scope}` scope"
        )))
    }
}

fn denial(access: Access, what: &str) -> ErrorResponse {
    match access {
        Access::Read => ErrorResponse::not_found(format!("{what} not found")),
        Access::Write => ErrorResponse::forbidden("insufficient role"),
    }
}

/// Load a workspace the caller may act on with at least `minimum` role.
pub(crate) async fn load_workspace_for(
    state: &AppState,
    ctx: &RequestContext,
    workspace_id: Uuid,
    minimum: WorkspaceRole,
    access: Access,
) -> Result<Workspace, ErrorResponse> {
    require_scope(ctx, access)?;

    let workspace = WorkspaceRepository::find_by_id(state.pool(), workspace_id)
        .await
        .map_err(|e| db_error_internal(e, "failed to load workspace"))?
        .ok_or_else(|| ErrorResponse::not_found("workspace not found"))?;

    let role = rbac::workspace_role(state.pool(), workspace.id, ctx.user.id)
        .await
        .map_err(|e| db_error_internal(e, "failed to resolve workspace role"))?;

    match role {
        Some(role) if role >= minimum => Ok(workspace),
        _ => Err(denial(access, "workspace")),
    }
}

/// Load a project the caller may act on with at least `minimum` effective
/// role (direct membership, or workspace membership folded down).
pub(crate) async fn load_project_for(
    state: &AppState,
    ctx: &RequestContext,
    project_id: Uuid,
    minimum: ProjectRole,
    access: Access,
) -> Result<(Project, ProjectRole), ErrorResponse> {
    require_scope(ctx, access)?;

    let project = ProjectRepository::find_by_id(state.pool(), project_id)
        .await
        .map_err(|e| db_error_internal(e, "failed to load project"))?
        .ok_or_else(|| ErrorResponse::not_found("project not found"))?;

    let role = rbac::effective_project_role(state.pool(), &project, ctx.user.id)
        .await
        .map_err(|e| db_error_internal(e, "failed to resolve project role"))?;

    match role {
        Some(role) if role >= minimum => Ok((project, role)),
        _ => Err(denial(access, "project")),
    }
}

fn db_error_internal(
    error: impl std::error::Error + 'static,
    message: &str,
) -> ErrorResponse {
    tracing::error!(error = %error, "{message}");
    ErrorResponse::internal(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_params_are_clamped() {
        let params = PageParams {
            page: Some(0),
            page_size: Some(1000),
        };
        assert_eq!(params.normalize(), (1, 100));

        let params = PageParams {
            page: Some(-3),
            page_size: Some(0),
        };
        assert_eq!(params.normalize(), (1, 1));

        let params = PageParams::default();
        assert_eq!(params.normalize(), (1, DEFAULT_PAGE_SIZE));

        let params = PageParams {
            page: Some(3),
            page_size: Some(20),
        };
        assert_eq!(params.limit_offset(), (20, 40));
    }
}
