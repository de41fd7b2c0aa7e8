use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use chrono::Utc;
use futures::TryStreamExt;
use serde::Deserialize;
use tokio_util::io::{ReaderStream, StreamReader};
use tracing::instrument;
use uuid::Uuid;

use super::{
    error::{db_error, ErrorResponse},
    load_project_for, Access, PageParams, Paged,
};
use crate::{
    auth::RequestContext,
    db::file_links::{FileLink, FileLinkRepository},
    db::files::{File, FileRepository, NewFile},
    db::upload_sessions::{UploadSession, UploadSessionRepository},
    db::workspaces::WorkspaceRepository,
    domain::{FileCategory, FileKind, ProjectRole, UploadStatus},
    files::{allocate_storage_key, infer_category, sanitize_file_name, StoragePoolName},
    storage::{finish_hash, HashingReader},
    AppState,
};

/// Upload bodies may carry full IFC models.
const MAX_UPLOAD_BYTES: usize = 2 * 1024 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/projects/{project_id}/files/reserve", post(reserve_upload))
        .route(
            "/projects/{project_id}/files/sessions/{session_id}/content",
            post(upload_content).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/projects/{project_id}/files/sessions/{session_id}/commit",
            post(commit_upload),
        )
        .route("/projects/{project_id}/files", get(list_files))
        .route("/files/{file_id}/content", get(download_file))
        .route("/files/{file_id}/links", get(list_links))
        .route("/files/{file_id}", delete(delete_file))
}

// ── Reserve ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ReserveUploadRequest {
    pub file_name: String,
    pub content_type: Option<String>,
    pub expected_size_bytes: Option<i64>,
}

#[instrument(name = "files.reserve", skip(state, ctx, payload), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn reserve_upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Json(payload): Json<ReserveUploadRequest>,
) -> Result<(StatusCode, Json<UploadSession>), ErrorResponse> {
    let (project, _) =
        load_project_for(&state, &ctx, project_id, ProjectRole::Editor, Access::Write).await?;

    let file_name = sanitize_file_name(&payload.file_name);
    if let Some(expected) = payload.expected_size_bytes {
        if expected < 0 {
            return Err(ErrorResponse::bad_request(
                "expected_size_bytes must not be negative",
            ));
        }
    }

    let temp_key = allocate_storage_key(
        project.workspace_id,
        project.id,
        StoragePoolName::Uploads,
        &file_name,
    );
    let expires_at = Utc::now() + chrono::Duration::seconds(state.config().upload_ttl_secs);

    let session = UploadSessionRepository::create(
        state.pool(),
        project.id,
        &file_name,
        payload.content_type.as_deref(),
        payload.expected_size_bytes,
        &temp_key,
        expires_at,
    )
    .await
    .map_err(|e| db_error(e, "failed to reserve upload"))?;

    Ok((StatusCode::CREATED, Json(session)))
}

// ── Upload content ──────────────────────────────────────────────────────────

#[instrument(name = "files.upload_content", skip(state, ctx, multipart), fields(project_id = %project_id, session_id = %session_id, user_id = %ctx.user.id))]
async fn upload_content(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((project_id, session_id)): Path<(Uuid, Uuid)>,
    mut multipart: Multipart,
) -> Result<Json<UploadSession>, ErrorResponse> {
    load_project_for(&state, &ctx, project_id, ProjectRole::Editor, Access::Write).await?;
    let session = load_session(&state, project_id, session_id).await?;

    if session.status.is_terminal() {
        return Err(ErrorResponse::conflict("upload session is already closed"));
    }
    if session.is_expired(Utc::now()) {
        return Err(ErrorResponse::conflict("upload session has expired"));
    }
    let temp_key = session
        .temp_storage_key
        .clone()
        .ok_or_else(|| ErrorResponse::internal("session has no temp storage key"))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| ErrorResponse::bad_request(format!("invalid multipart body: {e}")))?
        .ok_or_else(|| ErrorResponse::bad_request("multipart body contains no file part"))?;

    // Repeated uploads overwrite the temp object; the provider keeps the
    // write all-or-nothing.
    let reader = StreamReader::new(field.map_err(std::io::Error::other));
    let written = state
        .storage()
        .put(
            &temp_key,
            std::pin::pin!(reader),
            session.content_type.as_deref(),
        )
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to store upload content");
            ErrorResponse::internal("failed to store upload content")
        })? as i64;

    if let Some(expected) = session.expected_size_bytes {
        if written != expected {
            let _ = UploadSessionRepository::mark_failed(state.pool(), session.id).await;
            let _ = state.storage().delete(&temp_key).await;
            return Err(ErrorResponse::bad_request(format!(
                "expected {expected} bytes but received {written}"
            )));
        }
    }

    let transitioned = UploadSessionRepository::mark_uploading(state.pool(), session.id)
        .await
        .map_err(|e| db_error(e, "failed to update session"))?;
    if !transitioned {
        return Err(ErrorResponse::conflict("upload session is already closed"));
    }

    let refreshed = load_session(&state, project_id, session_id).await?;
    Ok(Json(refreshed))
}

// ── Commit ──────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct CommitUploadRequest {
    /// Optional SHA-256 (hex) the client computed; verified against the
    /// stored bytes before the file row is created.
    pub checksum: Option<String>,
}

#[instrument(name = "files.commit", skip(state, ctx, payload), fields(project_id = %project_id, session_id = %session_id, user_id = %ctx.user.id))]
async fn commit_upload(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((project_id, session_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<CommitUploadRequest>,
) -> Result<Json<File>, ErrorResponse> {
    let (project, _) =
        load_project_for(&state, &ctx, project_id, ProjectRole::Editor, Access::Write).await?;
    let session = load_session(&state, project_id, session_id).await?;

    if session.is_expired(Utc::now()) {
        return Err(ErrorResponse::conflict("upload session has expired"));
    }
    if session.status != UploadStatus::Uploading {
        return Err(ErrorResponse::conflict(
            "commit requires an upload in progress",
        ));
    }
    let temp_key = session
        .temp_storage_key
        .clone()
        .ok_or_else(|| ErrorResponse::internal("session has no temp storage key"))?;

    // Size is taken from storage, not from the client.
    let size_bytes = state
        .storage()
        .size(&temp_key)
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to stat uploaded bytes");
            ErrorResponse::internal("failed to stat uploaded bytes")
        })?
        .ok_or_else(|| {
            ErrorResponse::storage_inconsistency("uploaded bytes are missing from storage")
        })?;

    if let Some(expected) = session.expected_size_bytes {
        if size_bytes != expected {
            let _ = UploadSessionRepository::mark_failed(state.pool(), session.id).await;
            let _ = state.storage().delete(&temp_key).await;
            return Err(ErrorResponse::bad_request(format!(
                "expected {expected} bytes but stored {size_bytes}"
            )));
        }
    }

    // Quota gate. On refusal the session stays in Uploading and the bytes
    // remain recoverable.
    let workspace = WorkspaceRepository::find_by_id(state.pool(), project.workspace_id)
        .await
        .map_err(|e| db_error(e, "failed to load workspace"))?
        .ok_or_else(|| ErrorResponse::internal("workspace row is gone"))?;
    let quota = workspace.quota_bytes.or(state.config().workspace_quota_bytes);
    if let Some(quota) = quota {
        let used = WorkspaceRepository::usage_bytes(state.pool(), workspace.id)
            .await
            .map_err(|e| db_error(e, "failed to compute usage"))?;
        if used + size_bytes > quota {
            return Err(ErrorResponse::quota_exceeded(format!(
                "workspace quota of {quota} bytes would be exceeded ({used} in use)"
            )));
        }
    }

    // Copy uploads-pool bytes into the files pool, hashing in the same pass.
    let final_key = allocate_storage_key(
        project.workspace_id,
        project.id,
        StoragePoolName::Files,
        &session.file_name,
    );
    let source = state
        .storage()
        .open_read(&temp_key)
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to open uploaded bytes");
            ErrorResponse::internal("failed to open uploaded bytes")
        })?
        .ok_or_else(|| {
            ErrorResponse::storage_inconsistency("uploaded bytes are missing from storage")
        })?;
    let (reader, hasher) = HashingReader::new(source);
    state
        .storage()
        .put(
            &final_key,
            std::pin::pin!(reader),
            session.content_type.as_deref(),
        )
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to persist committed file");
            ErrorResponse::internal("failed to persist committed file")
        })?;
    let checksum = finish_hash(&hasher);

    if let Some(client_checksum) = &payload.checksum {
        if !client_checksum.eq_ignore_ascii_case(&checksum) {
            let _ = UploadSessionRepository::mark_failed(state.pool(), session.id).await;
            let _ = state.storage().delete(&final_key).await;
            let _ = state.storage().delete(&temp_key).await;
            return Err(ErrorResponse::bad_request(
                "checksum does not match uploaded content",
            ));
        }
    }

    let category = infer_category(&session.file_name, session.content_type.as_deref());
    let mut tx = state
        .pool()
        .begin()
        .await
        .map_err(|e| db_error(e, "failed to commit upload"))?;
    let file = FileRepository::create(
        &mut *tx,
        NewFile {
            project_id: project.id,
            name: &session.file_name,
            content_type: session.content_type.as_deref(),
            size_bytes,
            checksum: Some(&checksum),
            kind: FileKind::Source,
            category,
            storage_provider: state.storage().provider_id(),
            storage_key: &final_key,
        },
    )
    .await
    .map_err(|e| db_error(e, "failed to commit upload"))?;

    let won = UploadSessionRepository::mark_committed(&mut *tx, session.id, file.id)
        .await
        .map_err(|e| db_error(e, "failed to commit upload"))?;
    if !won {
        drop(tx);
        let _ = state.storage().delete(&final_key).await;
        return Err(ErrorResponse::conflict(
            "another commit won the race for this session",
        ));
    }
    tx.commit()
        .await
        .map_err(|e| db_error(e, "failed to commit upload"))?;

    // Temp bytes are now redundant; reclamation is best-effort.
    let storage = state.storage().clone();
    tokio::spawn(async move {
        if let Err(error) = storage.delete(&temp_key).await {
            tracing::warn!(%error, "failed to delete temp upload bytes");
        }
    });

    Ok(Json(file))
}

// ── Listing, download, lineage, soft delete ─────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ListFilesParams {
    pub kind: Option<FileKind>,
    pub category: Option<FileCategory>,
    #[serde(default)]
    pub include_deleted: bool,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl ListFilesParams {
    fn page_params(&self) -> PageParams {
        PageParams {
            page: self.page,
            page_size: self.page_size,
        }
    }
}

#[instrument(name = "files.list", skip(state, ctx, params), fields(project_id = %project_id, user_id = %ctx.user.id))]
async fn list_files(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(project_id): Path<Uuid>,
    Query(params): Query<ListFilesParams>,
) -> Result<Json<Paged<File>>, ErrorResponse> {
    let (_, role) =
        load_project_for(&state, &ctx, project_id, ProjectRole::Viewer, Access::Read).await?;

    // Deleted rows stay visible to administrators only.
    let include_deleted = params.include_deleted && role >= ProjectRole::ProjectAdmin;

    let page = params.page_params();
    let (limit, offset) = page.limit_offset();
    let (items, total) = FileRepository::list_by_project(
        state.pool(),
        project_id,
        params.kind,
        params.category,
        include_deleted,
        limit,
        offset,
    )
    .await
    .map_err(|e| db_error(e, "failed to list files"))?;

    Ok(Json(Paged::new(items, &page, total)))
}

#[instrument(name = "files.download", skip(state, ctx), fields(file_id = %file_id, user_id = %ctx.user.id))]
async fn download_file(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_id): Path<Uuid>,
) -> Result<Response, ErrorResponse> {
    let file = FileRepository::find_by_id(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to load file"))?
        .filter(|f| !f.is_deleted)
        .ok_or_else(|| ErrorResponse::not_found("file not found"))?;

    load_project_for(&state, &ctx, file.project_id, ProjectRole::Viewer, Access::Read).await?;

    stream_file(&state, &file).await
}

/// Shared by the registry download and the model-version artifact streams.
pub(crate) async fn stream_file(state: &AppState, file: &File) -> Result<Response, ErrorResponse> {
    let stream = state
        .storage()
        .open_read(&file.storage_key)
        .await
        .map_err(|error| {
            tracing::error!(%error, "failed to open stored bytes");
            ErrorResponse::internal("failed to open stored bytes")
        })?
        .ok_or_else(|| {
            tracing::error!(file_id = %file.id, key = %file.storage_key, "file row exists but bytes are gone");
            ErrorResponse::storage_inconsistency("stored bytes are missing")
        })?;

    let mut headers = HeaderMap::new();
    let content_type = file
        .content_type
        .as_deref()
        .unwrap_or("application/octet-stream");
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&file.size_bytes.to_string())
            .expect("integer header value"),
    );
    if let Ok(disposition) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\"", file.name))
    {
        headers.insert(header::CONTENT_DISPOSITION, disposition);
    }

    Ok((StatusCode::OK, headers, Body::from_stream(ReaderStream::new(stream))).into_response())
}

#[instrument(name = "files.links", skip(state, ctx), fields(file_id = %file_id, user_id = %ctx.user.id))]
async fn list_links(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_id): Path<Uuid>,
) -> Result<Json<Vec<FileLink>>, ErrorResponse> {
    let file = FileRepository::find_by_id(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to load file"))?
        .ok_or_else(|| ErrorResponse::not_found("file not found"))?;

    load_project_for(&state, &ctx, file.project_id, ProjectRole::Viewer, Access::Read).await?;

    let links = FileLinkRepository::list_for_file(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to list links"))?;
    Ok(Json(links))
}

#[instrument(name = "files.delete", skip(state, ctx), fields(file_id = %file_id, user_id = %ctx.user.id))]
async fn delete_file(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(file_id): Path<Uuid>,
) -> Result<StatusCode, ErrorResponse> {
    let file = FileRepository::find_by_id(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to load file"))?
        .filter(|f| !f.is_deleted)
        .ok_or_else(|| ErrorResponse::not_found("file not found"))?;

    load_project_for(&state, &ctx, file.project_id, ProjectRole::Editor, Access::Write).await?;

    if FileRepository::has_live_link(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to check lineage"))?
    {
        return Err(ErrorResponse::conflict(
            "file is referenced by lineage links and cannot be deleted",
        ));
    }

    let deleted = FileRepository::soft_delete(state.pool(), file_id)
        .await
        .map_err(|e| db_error(e, "failed to delete file"))?;
    if !deleted {
        return Err(ErrorResponse::not_found("file not found"));
    }

    // The row is retained for lineage; bytes are reclaimed in the background.
    let storage = state.storage().clone();
    let key = file.storage_key.clone();
    tokio::spawn(async move {
        if let Err(error) = storage.delete(&key).await {
            tracing::warn!(%error, "failed to delete soft-deleted bytes");
        }
    });

    Ok(StatusCode::NO_CONTENT)
}

async fn load_session(
    state: &AppState,
    project_id: Uuid,
    session_id: Uuid,
) -> Result<UploadSession, ErrorResponse> {
    UploadSessionRepository::find_by_id(state.pool(), session_id)
        .await
        .map_err(|e| db_error(e, "failed to load upload session"))?
        .filter(|s| s.project_id == project_id)
        .ok_or_else(|| ErrorResponse::not_found("upload session not found"))
}
