use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::{db_error, ErrorResponse},
    load_project_for, load_workspace_for, Access, PageParams, Paged,
};
use crate::{
    auth::RequestContext,
    db::memberships::{MembershipRepository, ProjectMember},
    db::projects::{Project, ProjectRepository},
    domain::{ProjectRole, WorkspaceRole},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/workspaces/{workspace_id}/projects",
            post(create_project).get(list_projects),
        )
        .route("/projects/{project_id}", get(get_project).put(update_project))
        .route(
            "/projects/{project_id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/projects/{project_id}/members/{user_id}",
            delete(remove_member),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[instrument(name = "projects.create", skip(state, ctx, payload), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn create_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<(StatusCode, Json<Project>), ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Member, Access::Write).await?;
    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("project name must not be empty"));
    }

    let project = ProjectRepository::create(
        state.pool(),
        workspace_id,
        payload.name.trim(),
        payload.description.as_deref(),
    )
    .await
    .map_err(|e| db_error(e, "failed to create project"))?;

    Ok((StatusCode::CREATED, Json(project)))
}

#[instrument(name = "projects.list", skip(state, ctx, params), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn list_projects(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<Project>>, ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Guest, Access::Read).await?;
    let (limit, offset) = params.limit_offset();
    let (items, total) =
        ProjectRepository::list_by_workspace(state.pool(), workspace_id, limit, offset)
            .await
            .map_err(|e| db_error(e, "failed to list projects"))?;
    Ok(Json(Paged::new(items, &params, total)))
}

#[instrument(name = "projects.get", skip(state, ctx), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn get_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Project>, ErrorResponse> {
    let (project, _) =
        load_project_for(&state, &ctx, project_id, ProjectRole::Viewer, Access::Read).await?;
    Ok(Json(project))
}

#[derive(Debug, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: String,
    pub description: Option<String>,
}

#[instrument(name = "projects.update", skip(state, ctx, payload), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn update_project(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<Project>, ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::ProjectAdmin, Access::Write).await?;
    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("project name must not be empty"));
    }

    let updated = ProjectRepository::update(
        state.pool(),
        project_id,
        payload.name.trim(),
        payload.description.as_deref(),
    )
    .await
    .map_err(|e| db_error(e, "failed to update project"))?
    .ok_or_else(|| ErrorResponse::not_found("project not found"))?;

    Ok(Json(updated))
}

#[derive(Debug, Deserialize)]
pub struct AddProjectMemberRequest {
    pub user_id: Uuid,
    pub role: ProjectRole,
}

#[instrument(name = "projects.members.list", skip(state, ctx), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
) -> Result<Json<Vec<ProjectMember>>, ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::Editor, Access::Read).await?;
    let members = MembershipRepository::list_project_members(state.pool(), project_id)
        .await
        .map_err(|e| db_error(e, "failed to list project members"))?;
    Ok(Json(members))
}

#[instrument(name = "projects.members.add", skip(state, ctx, payload), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<AddProjectMemberRequest>,
) -> Result<(StatusCode, Json<ProjectMember>), ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::ProjectAdmin, Access::Write).await?;
    let member = MembershipRepository::add_project_member(
        state.pool(),
        project_id,
        payload.user_id,
        payload.role,
    )
    .await
    .map_err(|e| db_error(e, "failed to add project member"))?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[instrument(name = "projects.members.remove", skip(state, ctx), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((project_id, member_user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::ProjectAdmin, Access::Write).await?;
    let removed =
        MembershipRepository::remove_project_member(state.pool(), project_id, member_user_id)
            .await
            .map_err(|e| db_error(e, "failed to remove project member"))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found("membership not found"))
    }
}
