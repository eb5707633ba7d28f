//! Auth routes — session bootstrap, profile, logout, WS tickets.

use axum::extract::{FromRef, State};
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::response::{IntoResponse, Json};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::routes::boards::board_error_to_status;
use crate::services::connection::{self, ProfilePatch};
use crate::services::session;
use crate::state::AppState;
use crate::store::User;

pub(crate) const COOKIE_NAME: &str = "session_token";

fn session_cookie(token: String, secure: bool, max_age: Duration) -> Cookie<'static> {
    Cookie::build((COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(secure)
        .max_age(max_age)
        .build()
}

// =============================================================================
// AUTH EXTRACTOR
// =============================================================================

/// Authenticated user from a `Bearer` token or the session cookie.
/// Use as a handler parameter to require authentication.
pub struct AuthUser {
    pub user: User,
    pub token: String,
}

fn bearer_token(parts: &axum::http::request::Parts) -> Option<String> {
    let value = parts.headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    (!token.is_empty()).then(|| token.to_owned())
}

impl<S> axum::extract::FromRequestParts<S> for AuthUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .or_else(|| {
                CookieJar::from_headers(&parts.headers)
                    .get(COOKIE_NAME)
                    .map(|c| c.value().to_owned())
            })
            .filter(|t| !t.is_empty())
            .ok_or(StatusCode::UNAUTHORIZED)?;

        let app_state = AppState::from_ref(state);
        let user = session::validate_session(app_state.store.as_ref(), &token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "session lookup failed");
                StatusCode::INTERNAL_SERVER_ERROR
            })?
            .ok_or(StatusCode::UNAUTHORIZED)?;

        Ok(Self { user, token })
    }
}

// =============================================================================
// HANDLERS
// =============================================================================

#[derive(Deserialize)]
pub struct DevSessionBody {
    pub name: String,
    pub email: String,
}

#[derive(Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub user: User,
}

/// `POST /api/dev/session` — create or reuse a user by e-mail and open a
/// session. Enabled only when `DEV_AUTH_BYPASS=true`.
pub async fn dev_session(
    State(state): State<AppState>,
    Json(body): Json<DevSessionBody>,
) -> Result<impl IntoResponse, StatusCode> {
    if !state.config.dev_auth_bypass {
        return Err(StatusCode::NOT_FOUND);
    }
    if body.name.trim().is_empty() || body.email.trim().is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (user, token) = session::bootstrap_session(state.store.as_ref(), body.name.trim(), body.email.trim())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "dev session bootstrap failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
    tracing::info!(user_id = %user.id, "dev session created");

    let max_age = Duration::milliseconds(session::SESSION_TTL_MS);
    let jar = CookieJar::new().add(session_cookie(token.clone(), state.config.cookie_secure, max_age));
    Ok((jar, Json(SessionResponse { token, user })))
}

/// `GET /api/auth/me` — return current user.
pub async fn me(auth: AuthUser) -> Json<User> {
    Json(auth.user)
}

/// `PATCH /api/auth/me` — update name/avatar; viewers see the change.
pub async fn update_me(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<ProfilePatch>,
) -> Result<Json<User>, StatusCode> {
    let user = connection::update_profile(&state, &auth.user, body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(user))
}

/// `POST /api/auth/logout` — delete session, clear cookie.
pub async fn logout(State(state): State<AppState>, auth: AuthUser) -> impl IntoResponse {
    if let Err(e) = session::delete_session(state.store.as_ref(), &auth.token).await {
        tracing::warn!(error = %e, "session delete failed");
    }

    let cookie = session_cookie(String::new(), state.config.cookie_secure, Duration::ZERO);
    let jar = CookieJar::new().add(cookie);
    (jar, StatusCode::NO_CONTENT)
}

/// `POST /api/auth/ws-ticket` — create a one-time WS ticket.
pub async fn ws_ticket(State(state): State<AppState>, auth: AuthUser) -> Result<Json<serde_json::Value>, StatusCode> {
    let ticket = session::create_ws_ticket(state.store.as_ref(), auth.user.id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(serde_json::json!({ "ticket": ticket })))
}

#[cfg(test)]
#[path = "auth_test.rs"]
mod tests;
