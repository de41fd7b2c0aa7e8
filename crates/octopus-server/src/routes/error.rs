use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Uniform error body: `{ "error": <stable code>, "message": <human text> }`.
#[derive(Debug)]
pub struct ErrorResponse {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized", "Authentication required")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "forbidden", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }

    /// Artifact exists in the model but processing has not produced it yet.
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_ready", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, "conflict", message)
    }

    pub fn quota_exceeded(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, "quota_exceeded", message)
    }

    /// Registry row and byte store disagree; alertable.
    pub fn storage_inconsistency(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "storage_inconsistency",
            message,
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "error": self.code, "message": self.message })),
        )
            .into_response()
    }
}

/// Fold a repository error into an HTTP response, surfacing constraint
/// violations as client errors instead of 500s.
pub(crate) fn db_error(
    error: impl std::error::Error + 'static,
    fallback_message: &str,
) -> ErrorResponse {
    let error: &(dyn std::error::Error + 'static) = &error;
    let mut current = Some(error);

    while let Some(err) = current {
        if let Some(sqlx_error) = err.downcast_ref::<sqlx::Error>() {
            if let sqlx::Error::Database(db_err) = sqlx_error {
                if db_err.is_unique_violation() {
                    return ErrorResponse::conflict("resource already exists");
                }
                if db_err.is_foreign_key_violation() {
                    return ErrorResponse::not_found("related resource not found");
                }
            }
            break;
        }
        current = err.source();
    }

    ErrorResponse::internal(fallback_message)
}
