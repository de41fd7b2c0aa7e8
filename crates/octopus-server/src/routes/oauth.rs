//! OAuth2 authorization-code flow with PKCE (RFC 6749 + RFC 7636).
//!
//! `/oauth/authorize` requires an authenticated session and hands out a
//! short-lived single-use code bound to the redirect URI. `/oauth/token` is
//! anonymous and exchanges the code for a signed access token. Error
//! responses use the RFC 6749 `error` codes verbatim.

use axum::{
    extract::{Extension, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::instrument;
use url::Url;

use crate::{
    auth::{
        self,
        crypto::{generate_token, hash_token, verify_client_secret, verify_pkce},
        RequestContext,
    },
    db::auth_codes::AuthCodeRepository,
    db::oauth_apps::{OAuthApp, OAuthAppRepository},
    db::users::UserRepository,
    domain::{ClientType, CodeChallengeMethod},
    AppState,
};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/authorize",
            get(authorize).layer(middleware::from_fn_with_state(state, auth::authenticate)),
        )
        .route("/token", post(token))
}

// ── Authorize ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// Plain 400 for situations where redirecting would be unsafe (unknown
/// client, unregistered redirect URI).
fn authorize_reject(error: &'static str, description: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

/// Plain `302 Found`, the status OAuth2 user agents expect.
fn found(url: &Url) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, url.to_string())]).into_response()
}

/// Error redirect back to a *validated* redirect URI.
fn authorize_error_redirect(
    redirect_uri: &Url,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> Response {
    let mut url = redirect_uri.clone();
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("error", error);
        pairs.append_pair("error_description", description);
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    found(&url)
}

#[instrument(name = "oauth.authorize", skip(app_state, ctx, params), fields(user_id = %ctx.user.id))]
async fn authorize(
    State(app_state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let Some(client_id) = params.client_id.as_deref() else {
        return authorize_reject("invalid_request", "client_id is required");
    };

    let app = match OAuthAppRepository::find_by_client_id(app_state.pool(), client_id).await {
        Ok(Some(app)) => app,
        Ok(None) => return authorize_reject("invalid_request", "unknown client_id"),
        Err(error) => {
            tracing::error!(%error, "failed to load oauth app");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // The redirect URI must match a registered value exactly; on mismatch no
    // redirect is ever emitted. The raw string is what gets bound to the
    // code and re-checked at the token endpoint.
    let (raw_redirect_uri, redirect_uri) = match params.redirect_uri.as_deref() {
        Some(uri) if app.redirect_uri_list().contains(&uri) => match Url::parse(uri) {
            Ok(url) => (uri.to_string(), url),
            Err(_) => return authorize_reject("invalid_request", "redirect_uri is not a valid URL"),
        },
        _ => {
            return authorize_reject(
                "invalid_request",
                "redirect_uri is missing or not registered for this client",
            )
        }
    };
    let state = params.state.as_deref();

    if params.response_type.as_deref() != Some("code") {
        return authorize_error_redirect(
            &redirect_uri,
            "unsupported_response_type",
            "only response_type=code is supported",
            state,
        );
    }

    if !app.is_enabled {
        return authorize_error_redirect(
            &redirect_uri,
            "unauthorized_client",
            "this client is disabled",
            state,
        );
    }

    // PKCE policy: public clients must send an S256 challenge; when a method
    // is named by any client it must be a known one.
    let challenge_method = match params.code_challenge_method.as_deref() {
        Some(value) => match CodeChallengeMethod::from_oauth_param(value) {
            Some(method) => Some(method),
            None => {
                return authorize_error_redirect(
                    &redirect_uri,
                    "invalid_request",
                    "code_challenge_method must be S256 or plain",
                    state,
                )
            }
        },
        // RFC 7636 defaults a bare challenge to `plain`.
        None => params.code_challenge.as_ref().map(|_| CodeChallengeMethod::Plain),
    };

    if app.client_type == ClientType::Public {
        match (&params.code_challenge, challenge_method) {
            (Some(_), Some(CodeChallengeMethod::S256)) => {}
            _ => {
                return authorize_error_redirect(
                    &redirect_uri,
                    "invalid_request",
                    "public clients must send a code_challenge with code_challenge_method=S256",
                    state,
                )
            }
        }
    }

    // Scope negotiation: no request means every allowed scope; anything
    // outside the allow-list is refused.
    let allowed = app.scope_list();
    let granted: Vec<&str> = match params.scope.as_deref() {
        None | Some("") => allowed.clone(),
        Some(requested) => {
            let requested: Vec<&str> = requested.split_whitespace().collect();
            if requested.iter().any(|s| !allowed.contains(s)) {
                return authorize_error_redirect(
                    &redirect_uri,
                    "invalid_scope",
                    "a requested scope is not allowed for this client",
                    state,
                );
            }
            requested
        }
    };

    let code = generate_token();
    let expires_at = Utc::now() + Duration::seconds(app_state.config().auth.code_ttl_secs);
    if let Err(error) = AuthCodeRepository::create(
        app_state.pool(),
        &hash_token(&code),
        app.id,
        ctx.user.id,
        app.workspace_id,
        &granted.join(" "),
        &raw_redirect_uri,
        params.code_challenge.as_deref(),
        challenge_method,
        expires_at,
    )
    .await
    {
        tracing::error!(%error, "failed to persist authorization code");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    let mut url = redirect_uri;
    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("code", &code);
        if let Some(state) = state {
            pairs.append_pair("state", state);
        }
    }
    found(&url)
}

// ── Token ───────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub scope: String,
}

fn token_error(status: StatusCode, error: &'static str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": error, "error_description": description })),
    )
        .into_response()
}

fn invalid_grant(description: &str) -> Response {
    token_error(StatusCode::BAD_REQUEST, "invalid_grant", description)
}

#[instrument(name = "oauth.token", skip(state, form))]
async fn token(State(state): State<AppState>, Form(form): Form<TokenRequest>) -> Response {
    if form.grant_type.as_deref() != Some("authorization_code") {
        return token_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            "only the authorization_code grant is supported",
        );
    }
    let (Some(code), Some(client_id)) = (form.code.as_deref(), form.client_id.as_deref()) else {
        return token_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "code and client_id are required",
        );
    };

    let app = match OAuthAppRepository::find_by_client_id(state.pool(), client_id).await {
        Ok(Some(app)) => app,
        Ok(None) => return invalid_grant("authorization code was not found for this client"),
        Err(error) => {
            tracing::error!(%error, "failed to load oauth app");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let stored = match AuthCodeRepository::find_for_app(state.pool(), &hash_token(code), app.id).await
    {
        Ok(Some(stored)) => stored,
        Ok(None) => return invalid_grant("authorization code was not found for this client"),
        Err(error) => {
            tracing::error!(%error, "failed to load authorization code");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if stored.expires_at < Utc::now() {
        return invalid_grant("authorization code has expired");
    }
    if form.redirect_uri.as_deref() != Some(stored.redirect_uri.as_str()) {
        return invalid_grant("redirect_uri does not match the one bound to this code");
    }

    if let Err(response) = verify_client(&app, form.client_secret.as_deref()) {
        return response;
    }

    // PKCE: a code issued with a challenge demands a matching verifier, and
    // public clients never get a pass without one.
    match (&stored.code_challenge, stored.code_challenge_method) {
        (Some(challenge), Some(method)) => {
            let Some(verifier) = form.code_verifier.as_deref() else {
                return invalid_grant("code_verifier is required for this code");
            };
            if !verify_pkce(method, challenge, verifier) {
                return invalid_grant("code_verifier does not match the challenge");
            }
        }
        (Some(_), None) => return invalid_grant("stored code challenge is unusable"),
        (None, _) => {
            if app.client_type == ClientType::Public {
                return invalid_grant("public clients must use PKCE");
            }
        }
    }

    // Single use: the guarded update makes replay detection atomic.
    match AuthCodeRepository::consume(state.pool(), stored.id).await {
        Ok(true) => {}
        Ok(false) => return invalid_grant("authorization code has already been used"),
        Err(error) => {
            tracing::error!(%error, "failed to consume authorization code");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let user = match UserRepository::find_by_id(state.pool(), stored.user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return invalid_grant("the user behind this code no longer exists"),
        Err(error) => {
            tracing::error!(%error, "failed to load user for token");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let ttl = state.config().auth.access_token_ttl_secs;
    let access_token = state.token_signer().issue(
        &user.subject,
        stored.workspace_id,
        &app.client_id,
        &stored.scopes,
        ttl,
        Utc::now(),
    );

    Json(TokenResponse {
        access_token,
        token_type: "Bearer",
        expires_in: ttl,
        scope: stored.scopes,
    })
    .into_response()
}

fn verify_client(app: &OAuthApp, client_secret: Option<&str>) -> Result<(), Response> {
    if app.client_type != ClientType::Confidential {
        return Ok(());
    }

    let stored_hash = app.client_secret_hash.as_deref().ok_or_else(|| {
        token_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client has no usable secret",
        )
    })?;
    let presented = client_secret.ok_or_else(|| {
        token_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client_secret is required",
        )
    })?;
    if !verify_client_secret(presented, stored_hash) {
        return Err(token_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "client authentication failed",
        ));
    }
    Ok(())
}
