use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::Response,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::{db_error, ErrorResponse},
    files::stream_file,
    load_project_for, Access, PageParams, Paged,
};
use crate::{
    auth::RequestContext,
    db::files::FileRepository,
    db::model_versions::{ModelVersion, ModelVersionRepository},
    db::models::{Model, ModelRepository},
    db::projects::Project,
    db::jobs::JobRepository,
    domain::{FileCategory, FileKind, ProjectRole},
    processing::{ModelVersionJob, JOB_CONVERT_WEXBIM, JOB_EXTRACT_PROPERTIES},
    AppState,
};
use octopus_ifc::{ElementProperties, PropertyDocument};

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/projects/{project_id}/models",
            post(create_model).get(list_models),
        )
        .route("/models/{model_id}", get(get_model))
        .route(
            "/models/{model_id}/versions",
            post(create_version).get(list_versions),
        )
        .route("/modelversions/{version_id}", get(get_version))
        .route("/modelversions/{version_id}/wexbim", get(stream_wexbim))
        .route(
            "/modelversions/{version_id}/properties",
            get(get_properties),
        )
}

#[derive(Debug, Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub description: Option<String>,
}

#[instrument(name = "models.create", skip(state, ctx, payload), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn create_model(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<CreateModelRequest>,
) -> Result<(StatusCode, Json<Model>), ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::Editor, Access::Write).await?;
    if payload.name.trim().is_empty() {
        return Err(ErrorResponse::bad_request("model name must not be empty"));
    }

    let model = ModelRepository::create(
        state.pool(),
        project_id,
        payload.name.trim(),
        payload.description.as_deref(),
    )
    .await
    .map_err(|e| db_error(e, "failed to create model"))?;

    Ok((StatusCode::CREATED, Json(model)))
}

#[instrument(name = "models.list", skip(state, ctx, params), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn list_models(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<Model>>, ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::Viewer, Access::Read).await?;
    let (limit, offset) = params.limit_offset();
    let (items, total) = ModelRepository::list_by_project(state.pool(), project_id, limit, offset)
        .await
        .map_err(|e| db_error(e, "failed to list models"))?;
    Ok(Json(Paged::new(items, &params, total)))
}

#[instrument(name = "models.get", skip(state, ctx), fields(model_id = %model_id, user_id = %ctx.user.id))]
async fn get_model(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(model_id): Path<Uuid>,
) -> Result<Json<Model>, ErrorResponse> {
    let (model, _) = load_model(&state, &ctx, model_id, ProjectRole::Viewer, Access::Read).await?;
    Ok(Json(model))
}

// ── Versions ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateVersionRequest {
    pub ifc_file_id: Uuid,
}

#[instrument(name = "models.versions.create", skip(state, ctx, payload), fields(model_id = %model_id, user_id = %ctx.user.id))]
async fn create_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(model_id): Path<Uuid>,
    Json(payload): Json<CreateVersionRequest>,
) -> Result<(StatusCode, Json<ModelVersion>), ErrorResponse> {
    let (model, _) = load_model(&state, &ctx, model_id, ProjectRole::Editor, Access::Write).await?;

    let ifc = FileRepository::find_by_id(state.pool(), payload.ifc_file_id)
        .await
        .map_err(|e| db_error(e, "failed to load source file"))?
        .ok_or_else(|| ErrorResponse::bad_request("ifc_file_id does not exist"))?;
    if ifc.is_deleted {
        return Err(ErrorResponse::bad_request("source file has been deleted"));
    }
    if ifc.project_id != model.project_id {
        return Err(ErrorResponse::bad_request(
            "source file belongs to a different project",
        ));
    }
    if ifc.kind != FileKind::Source {
        return Err(ErrorResponse::bad_request("source file must be an upload, not an artifact"));
    }
    if !matches!(ifc.category, FileCategory::Ifc | FileCategory::Other) {
        return Err(ErrorResponse::bad_request("source file is not an IFC model"));
    }

    // Version insert and job enqueue share one transaction: a reader can
    // never observe a pending version without its jobs, nor an orphan job.
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|e| db_error(e, "failed to create version"))?;

    let number = ModelVersionRepository::next_version_number(&mut *tx, model.id)
        .await
        .map_err(|e| db_error(e, "failed to create version"))?;
    let version = ModelVersionRepository::create(&mut *tx, model.id, number, ifc.id)
        .await
        .map_err(|e| db_error(e, "failed to create version"))?;

    let payload = ModelVersionJob::payload(version.id);
    JobRepository::enqueue(&mut *tx, JOB_CONVERT_WEXBIM, &payload)
        .await
        .map_err(|e| db_error(e, "failed to enqueue processing"))?;
    JobRepository::enqueue(&mut *tx, JOB_EXTRACT_PROPERTIES, &payload)
        .await
        .map_err(|e| db_error(e, "failed to enqueue processing"))?;

    tx.commit()
        .await
        .map_err(|e| db_error(e, "failed to create version"))?;

    Ok((StatusCode::CREATED, Json(version)))
}

#[instrument(name = "models.versions.list", skip(state, ctx, params), fields(model_id = %model_id, user_id = %ctx.user.id))]
async fn list_versions(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(model_id): Path<Uuid>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paged<ModelVersion>>, ErrorResponse> {
    let (model, _) = load_model(&state, &ctx, model_id, ProjectRole::Viewer, Access::Read).await?;
    let (limit, offset) = params.limit_offset();
    let (items, total) = ModelVersionRepository::list_by_model(state.pool(), model.id, limit, offset)
        .await
        .map_err(|e| db_error(e, "failed to list versions"))?;
    Ok(Json(Paged::new(items, &params, total)))
}

#[instrument(name = "models.versions.get", skip(state, ctx), fields(version_id = %version_id, user_id = %ctx.user.id))]
async fn get_version(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(version_id): Path<Uuid>,
) -> Result<Json<ModelVersion>, ErrorResponse> {
    let (version, _) =
        load_version(&state, &ctx, version_id, ProjectRole::Viewer, Access::Read).await?;
    Ok(Json(version))
}

#[instrument(name = "models.versions.wexbim", skip(state, ctx), fields(version_id = %version_id, user_id = %ctx.user.id))]
async fn stream_wexbim(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(version_id): Path<Uuid>,
) -> Result<Response, ErrorResponse> {
    let (version, _) =
        load_version(&state, &ctx, version_id, ProjectRole::Viewer, Access::Read).await?;

    let file_id = version.wex_bim_file_id.ok_or_else(|| {
        ErrorResponse::not_ready("the WexBIM artifact has not been produced yet")
    })?;
    let file = FileRepository::find_by_id(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to load artifact"))?
        .ok_or_else(|| ErrorResponse::storage_inconsistency("artifact row is missing"))?;

    stream_file(&state, &file).await
}

#[derive(Debug, Deserialize)]
pub struct PropertiesParams {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

#[instrument(name = "models.versions.properties", skip(state, ctx, params), fields(version_id = %version_id, user_id = %ctx.user.id))]
async fn get_properties(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(version_id): Path<Uuid>,
    Query(params): Query<PropertiesParams>,
) -> Result<Json<Paged<ElementProperties>>, ErrorResponse> {
    let (version, _) =
        load_version(&state, &ctx, version_id, ProjectRole::Viewer, Access::Read).await?;

    let file_id = version.properties_file_id.ok_or_else(|| {
        ErrorResponse::not_ready("the properties artifact has not been produced yet")
    })?;
    let file = FileRepository::find_by_id(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to load artifact"))?
        .ok_or_else(|| ErrorResponse::storage_inconsistency("artifact row is missing"))?;

    let mut stream = state
        .storage()
        .open_read(&file.storage_key)
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to open properties artifact");
            ErrorResponse::internal("failed to open properties artifact")
        })?
        .ok_or_else(|| ErrorResponse::storage_inconsistency("artifact bytes are missing"))?;

    let mut raw = Vec::with_capacity(file.size_bytes.max(0) as usize);
    tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut raw)
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to read properties artifact");
            ErrorResponse::internal("failed to read properties artifact")
        })?;
    let document: PropertyDocument = serde_json::from_slice(&raw).map_err(|error| {
        tracing::error!(%error, "properties artifact is not valid JSON");
        ErrorResponse::internal("properties artifact is corrupt")
    })?;

    let page = PageParams {
        page: params.page,
        page_size: params.page_size,
    };
    let (limit, offset) = page.limit_offset();
    let total = document.total_elements as i64;
    let items: Vec<ElementProperties> = document
        .elements
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();

    Ok(Json(Paged::new(items, &page, total)))
}

// ── Helpers ─────────────────────────────────────────────────────────────────

async fn load_model(
    state: &AppState,
    ctx: &RequestContext,
    model_id: Uuid,
    minimum: ProjectRole,
    access: Access,
) -> Result<(Model, Project), ErrorResponse> {
    let model = ModelRepository::find_by_id(state.pool(), model_id)
        .await
        .map_err(|e| db_error(e, "failed to load model"))?
        .ok_or_else(|| ErrorResponse::not_found("model not found"))?;
    let (project, _) = load_project_for(state, ctx, model.project_id, minimum, access).await?;
    Ok((model, project))
}

async fn load_version(
    state: &AppState,
    ctx: &RequestContext,
    version_id: Uuid,
    minimum: ProjectRole,
    access: Access,
) -> Result<(ModelVersion, Project), ErrorResponse> {
    let version = ModelVersionRepository::find_by_id(state.pool(), version_id)
        .await
        .map_err(|e| db_error(e, "failed to load model version"))?
        .ok_or_else(|| ErrorResponse::not_found("model version not found"))?;
    let model = ModelRepository::find_by_id(state.pool(), version.model_id)
        .await
        .map_err(|e| db_error(e, "failed to load model"))?
        .ok_or_else(|| ErrorResponse::not_found("model not found"))?;
    let (project, _) = load_project_for(state, ctx, model.project_id, minimum, access).await?;
    Ok((version, project))
}
