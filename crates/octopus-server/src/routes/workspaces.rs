use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::{db_error, ErrorResponse},
    load_workspace_for, require_scope, Access, PageParams, Paged,
};
use crate::{
    auth::crypto::{generate_token, hash_client_secret},
    auth::scopes::KNOWN_SCOPES,
    auth::RequestContext,
    db::memberships::{MembershipRepository, WorkspaceMember},
    db::oauth_apps::{OAuthApp, OAuthAppRepository},
    db::workspaces::{Workspace, WorkspaceRepository},
    domain::{ClientType, WorkspaceRole},
    AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/workspaces", post(create_workspace).get(list_workspaces))
        .route(
            "/workspaces/{workspace_id}",
            get(get_workspace).put(update_workspace),
        )
        .route(
            "/workspaces/{workspace_id}/members",
            get(list_members).post(add_member),
        )
        .route(
            "/workspaces/{workspace_id}/members/{user_id}",
            delete(remove_member),
        )
        .route(
            "/workspaces/{workspace_id}/apps",
            get(list_apps).post(create_app),
        )
        .route("/users/me", get(current_user))
}

#[derive(Debug, Deserialize)]
pub struct CreateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
    pub quota_bytes: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateWorkspaceRequest {
    pub name: String,
    pub description: Option<String>,
    pub quota_bytes: Option<i64>,
}

#[instrument(name = "workspaces.create", skip(state, ctx, payload), fields(user_id = %ctx.user.id))]
async fn create_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<CreateWorkspaceRequest>,
) -> Result<(StatusCode, Json<Workspace>), ErrorResponse> {
    require_scope(&ctx, Access::Write)?;
    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("workspace name must not be empty"));
    }

    let quota = payload
        .quota_bytes
        .or(state.config().workspace_quota_bytes);

    // Creator becomes Owner in the same transaction.
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|e| db_error(e, "failed to create workspace"))?;
    let workspace = WorkspaceRepository::create(
        &mut *tx,
        payload.name.trim(),
        payload.description.as_deref(),
        quota,
    )
    .await
    .map_err(|e| db_error(e, "failed to create workspace"))?;
    MembershipRepository::add_workspace_member(
        &mut *tx,
        workspace.id,
        ctx.user.id,
        WorkspaceRole::Owner,
    )
    .await
    .map_err(|e| db_error(e, "failed to create workspace"))?;
    tx.commit()
        .await
        .map_err(|e| db_error(e, "failed to create workspace"))?;

    Ok((StatusCode::CREATED, Json(workspace)))
}

#[instrument(name = "workspaces.list", skip(state, ctx, params), fields(user_id = %ctx.user.id))]
async fn list_workspaces(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<Workspace>>, ErrorResponse> {
    require_scope(&ctx, Access::Read)?;
    let (limit, offset) = params.limit_offset();
    let (items, total) = WorkspaceRepository::list_for_user(state.pool(), ctx.user.id, limit, offset)
        .await
        .map_err(|e| db_error(e, "failed to list workspaces"))?;
    Ok(Json(Paged::new(items, &params, total)))
}

#[instrument(name = "workspaces.get", skip(state, ctx), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn get_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Workspace>, ErrorResponse> {
    let workspace = load_workspace_for(
        &state,
        &ctx,
        workspace_id,
        WorkspaceRole::Guest,
        Access::Read,
    )
    .await?;
    Ok(Json(workspace))
}

#[instrument(name = "workspaces.update", skip(state, ctx, payload), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn update_workspace(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<UpdateWorkspaceRequest>,
) -> Result<Json<Workspace>, ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Admin, Access::Write).await?;
    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("workspace name must not be empty"));
    }

    let updated = WorkspaceRepository::update(
        state.pool(),
        workspace_id,
        payload.name.trim(),
        payload.description.as_deref(),
        payload.quota_bytes,
    )
    .await
    .map_err(|e| db_error(e, "failed to update workspace"))?
    .ok_or_else(|| ErrorResponse::not_found("workspace not found"))?;

    Ok(Json(updated))
}

#[instrument(name = "users.me", skip(ctx), fields(user_id = %ctx.user.id))]
async fn current_user(
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<crate::db::users::User>, ErrorResponse> {
    require_scope(&ctx, Access::Read)?;
    Ok(Json(ctx.user))
}

// ── Members ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    pub role: WorkspaceRole,
}

#[instrument(name = "workspaces.members.list", skip(state, ctx), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn list_members(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<WorkspaceMember>>, ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Member, Access::Read).await?;
    let members = MembershipRepository::list_workspace_members(state.pool(), workspace_id)
        .await
        .map_err(|e| db_error(e, "failed to list members"))?;
    Ok(Json(members))
}

#[instrument(name = "workspaces.members.add", skip(state, ctx, payload), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn add_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<AddMemberRequest>,
) -> Result<(StatusCode, Json<WorkspaceMember>), ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Admin, Access::Write).await?;
    let member = MembershipRepository::add_workspace_member(
        state.pool(),
        workspace_id,
        payload.user_id,
        payload.role,
    )
    .await
    .map_err(|e| db_error(e, "failed to add member"))?;
    Ok((StatusCode::CREATED, Json(member)))
}

#[instrument(name = "workspaces.members.remove", skip(state, ctx), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn remove_member(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((workspace_id, member_user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Admin, Access::Write).await?;

    let leaving_role =
        MembershipRepository::workspace_role(state.pool(), workspace_id, member_user_id)
            .await
            .map_err(|e| db_error(e, "failed to remove member"))?;
    if leaving_role == Some(WorkspaceRole::Owner) {
        let owners = MembershipRepository::count_workspace_owners(state.pool(), workspace_id)
            .await
            .map_err(|e| db_error(e, "failed to remove member"))?;
        if owners <= 1 {
            return Err(ErrorResponse::conflict(
                "a workspace must keep at least one owner",
            ));
        }
    }

    let removed =
        MembershipRepository::remove_workspace_member(state.pool(), workspace_id, member_user_id)
            .await
            .map_err(|e| db_error(e, "failed to remove member"))?;
    if removed {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ErrorResponse::not_found("membership not found"))
    }
}

// ── OAuth app registration ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateAppRequest {
    pub name: String,
    pub client_type: ClientType,
    pub redirect_uris: Vec<String>,
    pub allowed_scopes: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct CreateAppResponse {
    #[serde(flatten)]
    pub app: OAuthApp,
    /// Plaintext secret, returned exactly once at registration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
}

#[instrument(name = "workspaces.apps.create", skip(state, ctx, payload), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn create_app(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
    Json(payload): Json<CreateAppRequest>,
) -> Result<(StatusCode, Json<CreateAppResponse>), ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Admin, Access::Write).await?;

    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("app name must not be empty"));
    }
    if payload.redirect_uris.is_empty() {
        return Err(ErrorResponse::bad_request(
            "at least one redirect_uri is required",
        ));
    }
    for uri in &payload.redirect_uris {
        if uri.contains(char::is_whitespace) || !uri.contains("://") {
            return Err(ErrorResponse::bad_request(format!(
                "invalid redirect_uri: {uri}"
            )));
        }
    }
    let scopes = payload
        .allowed_scopes
        .unwrap_or_else(|| KNOWN_SCOPES.iter().map(|s| s.to_string()).collect());
    for scope in &scopes {
        if !KNOWN_SCOPES.contains(&scope.as_str()) {
            return Err(ErrorResponse::bad_request(format!("unknown scope: {scope}")));
        }
    }

    let client_id = generate_token();
    let (client_secret, secret_hash) = match payload.client_type {
        ClientType::Confidential => {
            let secret = generate_token();
            let hash = hash_client_secret(&secret);
            (Some(secret), Some(hash))
        }
        ClientType::Public => (None, None),
    };

    let app = OAuthAppRepository::create(
        state.pool(),
        workspace_id,
        payload.name.trim(),
        &client_id,
        secret_hash.as_deref(),
        payload.client_type,
        &payload.redirect_uris.join(" "),
        &scopes.join(" "),
    )
    .await
    .map_err(|e| db_error(e, "failed to register app"))?;

    Ok((
        StatusCode::CREATED,
        Json(CreateAppResponse { app, client_secret }),
    ))
}

#[instrument(name = "workspaces.apps.list", skip(state, ctx), fields(workspace_id = %workspace_id, user_id = %ctx.user.id))]
async fn list_apps(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(workspace_id): Path<Uuid>,
) -> Result<Json<Vec<OAuthApp>>, ErrorResponse> {
    load_workspace_for(&state, &ctx, workspace_id, WorkspaceRole::Admin, Access::Read).await?;
    let apps = OAuthAppRepository::list_by_workspace(state.pool(), workspace_id)
        .await
        .map_err(|e| db_error(e, "failed to list apps"))?;
    Ok(Json(apps))
}
