//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the REST API and the websocket endpoint under a single
//! Axum router. Every route shares one `AppState`; CORS is open because the
//! API authenticates with bearer tokens or a same-site session cookie.

pub mod auth;
pub mod boards;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post, put};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/dev/session", post(auth::dev_session))
        .route("/api/auth/me", get(auth::me).patch(auth::update_me))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/ws-ticket", post(auth::ws_ticket))
        .route("/api/boards", get(boards::list_boards).post(boards::create_board))
        .route(
            "/api/boards/{id}",
            get(boards::get_board)
                .patch(boards::update_board)
                .delete(boards::delete_board),
        )
        .route("/api/boards/{id}/share", put(boards::share_board))
        .route("/api/boards/{id}/members", post(boards::add_member))
        .route("/api/boards/{id}/members/{user_id}", axum::routing::delete(boards::remove_member))
        .route("/api/boards/{id}/columns", post(boards::create_column))
        .route(
            "/api/boards/{id}/columns/{column_id}",
            patch(boards::update_column).delete(boards::delete_column),
        )
        .route("/api/boards/{id}/columns/{column_id}/tasks", post(boards::create_task))
        .route(
            "/api/boards/{id}/tasks/{task_id}",
            patch(boards::update_task).delete(boards::delete_task),
        )
        .route("/api/boards/{id}/tasks/{task_id}/move", put(boards::move_task))
        .route("/api/boards/{id}/tasks/{task_id}/suggest", post(boards::suggest_task))
        .route(
            "/api/boards/{id}/tasks/{task_id}/comments",
            get(boards::list_comments).post(boards::add_comment),
        )
        .route(
            "/api/boards/{id}/tasks/{task_id}/comments/{comment_id}",
            patch(boards::update_comment).delete(boards::delete_comment),
        )
        .route("/api/boards/{id}/activities", get(boards::list_activities))
        .route("/api/boards/{id}/viewers", get(boards::list_viewers))
        .route("/api/public/boards/{public_id}", get(boards::public_board))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

// =============================================================================
// TEST SERVER
// =============================================================================
