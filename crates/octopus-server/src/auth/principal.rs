//! Principal extraction and user auto-provisioning.
//!
//! Every API request passes through [`authenticate`]: the principal is
//! resolved from a bearer token (always accepted when it verifies) or, in
//! development mode, from the configured static identity. The matching
//! `users` row is created on first sight and attached to the request as
//! [`RequestContext`].

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use chrono::Utc;

use crate::{
    auth::scopes::ScopeSet,
    config::AuthMode,
    db::users::{User, UserRepository},
    routes::error::ErrorResponse,
    AppState,
};

/// What a handler knows about the caller.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub user: User,
    pub scopes: ScopeSet,
}

struct ResolvedPrincipal {
    subject: String,
    email: Option<String>,
    display_name: Option<String>,
    scopes: ScopeSet,
}

pub async fn authenticate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ErrorResponse> {
    let bearer = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let principal = match bearer {
        Some(token) => {
            let claims = state
                .token_signer()
                .verify(token, Utc::now())
                .map_err(|_| ErrorResponse::unauthorized())?;
            ResolvedPrincipal {
                subject: claims.sub,
                email: None,
                display_name: None,
                scopes: ScopeSet::from_space_separated(&claims.scp),
            }
        }
        None if state.config().auth.mode == AuthMode::Development => {
            let dev = &state.config().auth.dev;
            ResolvedPrincipal {
                subject: dev.subject.clone(),
                email: dev.email.clone(),
                display_name: dev.display_name.clone(),
                scopes: ScopeSet::all(),
            }
        }
        None => return Err(ErrorResponse::unauthorized()),
    };

    let user = UserRepository::get_or_provision(
        state.pool(),
        &principal.subject,
        principal.email.as_deref(),
        principal.display_name.as_deref(),
    )
    .await
    .map_err(|error| {
        tracing::error!(?error, "failed to provision user");
        ErrorResponse::internal("failed to resolve user")
    })?;

    request.extensions_mut().insert(RequestContext {
        user,
        scopes: principal.scopes,
    });

    Ok(next.run(request).await)
}
