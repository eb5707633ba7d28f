//! Board REST routes: boards, members, columns, tasks, comments, activity.
//!
//! Handlers translate HTTP into service calls and service errors into
//! status codes. Every mutation here fans out to websocket viewers from
//! inside the service layer.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use frames::events::{ActivityRecord, BoardSnapshot, ColumnCard, CommentCard, TaskCard, TaskMoved, UserPresence};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::routes::auth::AuthUser;
use crate::services::board::{self, BoardError, BoardListItem, BoardPatch, MemberRef, MoveRequest, NewBoard, NewTask, TaskPatch};
use crate::services::suggest::{self, SuggestError};
use crate::services::{activity, connection};
use crate::state::AppState;
use crate::store::StoreError;

pub(crate) fn board_error_to_status(err: BoardError) -> StatusCode {
    match err {
        BoardError::BoardNotFound(_)
        | BoardError::ColumnNotFound(_)
        | BoardError::TaskNotFound(_)
        | BoardError::CommentNotFound(_)
        | BoardError::UserNotFound(_)
        | BoardError::ConnectionNotFound(_) => StatusCode::NOT_FOUND,
        BoardError::Forbidden => StatusCode::FORBIDDEN,
        BoardError::Invalid(_) => StatusCode::BAD_REQUEST,
        BoardError::Conflict(_) => StatusCode::CONFLICT,
        BoardError::Store(e) => store_error_to_status(&e),
        BoardError::Activity(e) => {
            tracing::error!(error = %e, "mutation failed to record activity");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn store_error_to_status(err: &StoreError) -> StatusCode {
    tracing::error!(error = %err, "store failure");
    match err {
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) fn suggest_error_to_status(err: SuggestError) -> StatusCode {
    match err {
        SuggestError::Board(e) => board_error_to_status(e),
        SuggestError::Llm(e) => {
            tracing::warn!(error = %e, "suggestion request failed");
            StatusCode::BAD_GATEWAY
        }
        SuggestError::NotConfigured => StatusCode::SERVICE_UNAVAILABLE,
    }
}

// =============================================================================
// BOARDS
// =============================================================================

/// `GET /api/boards` — boards the caller owns or belongs to.
pub async fn list_boards(State(state): State<AppState>, auth: AuthUser) -> Result<Json<Vec<BoardListItem>>, StatusCode> {
    let boards = board::list_boards(&state, &auth.user)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(boards))
}

/// `POST /api/boards` — create a board with the default columns.
pub async fn create_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<NewBoard>,
) -> Result<impl IntoResponse, StatusCode> {
    let created = board::create_board(&state, &auth.user, body)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(created.snapshot(&[]))))
}

/// `GET /api/boards/{id}` — full board state.
pub async fn get_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<BoardSnapshot>, StatusCode> {
    let snapshot = board::get_board(&state, &auth.user, board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(snapshot))
}

/// `PATCH /api/boards/{id}` — rename or re-describe.
pub async fn update_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<BoardPatch>,
) -> Result<Json<BoardListItem>, StatusCode> {
    let updated = board::update_board(&state, &auth.user, board_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(BoardListItem::from(&updated)))
}

/// `DELETE /api/boards/{id}` — owner only.
pub async fn delete_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<StatusCode, StatusCode> {
    board::delete_board(&state, &auth.user, board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ShareBody {
    pub enable: bool,
}

#[derive(Serialize)]
pub struct ShareResponse {
    pub is_public: bool,
    pub public_id: Option<String>,
}

/// `PUT /api/boards/{id}/share` — toggle the public link.
pub async fn share_board(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<ShareBody>,
) -> Result<Json<ShareResponse>, StatusCode> {
    let updated = board::set_sharing(&state, &auth.user, board_id, body.enable)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(ShareResponse { is_public: updated.is_public, public_id: updated.public_id }))
}

// =============================================================================
// MEMBERS
// =============================================================================

/// `POST /api/boards/{id}/members` — add by `user_id` or `email`.
pub async fn add_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<MemberRef>,
) -> Result<impl IntoResponse, StatusCode> {
    let user = board::add_member(&state, &auth.user, board_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(user.summary())))
}

/// `DELETE /api/boards/{id}/members/{user_id}`.
pub async fn remove_member(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, user_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    board::remove_member(&state, &auth.user, board_id, user_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// COLUMNS
// =============================================================================

#[derive(Deserialize)]
pub struct ColumnBody {
    pub title: String,
    #[serde(default)]
    pub position: Option<usize>,
}

/// `POST /api/boards/{id}/columns`.
pub async fn create_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<ColumnBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let card = board::create_column(&state, &auth.user, board_id, &body.title, body.position)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// `PATCH /api/boards/{id}/columns/{column_id}` — rename.
pub async fn update_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, column_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<ColumnBody>,
) -> Result<Json<ColumnCard>, StatusCode> {
    let card = board::rename_column(&state, &auth.user, board_id, column_id, &body.title)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(card))
}

/// `DELETE /api/boards/{id}/columns/{column_id}` — removes its tasks too.
pub async fn delete_column(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, column_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    board::delete_column(&state, &auth.user, board_id, column_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// TASKS
// =============================================================================

#[derive(Serialize)]
pub struct PlacedTask {
    pub column_id: Uuid,
    pub position: usize,
    pub task: TaskCard,
}

/// `POST /api/boards/{id}/columns/{column_id}/tasks`.
pub async fn create_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, column_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<NewTask>,
) -> Result<impl IntoResponse, StatusCode> {
    let (task, position) = board::create_task(&state, &auth.user, board_id, column_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(PlacedTask { column_id, position, task: task.card() })))
}

/// `PATCH /api/boards/{id}/tasks/{task_id}`.
pub async fn update_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<TaskPatch>,
) -> Result<Json<TaskCard>, StatusCode> {
    let task = board::update_task(&state, &auth.user, board_id, task_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(task.card()))
}

/// `DELETE /api/boards/{id}/tasks/{task_id}`.
pub async fn delete_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    board::delete_task(&state, &auth.user, board_id, task_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `PUT /api/boards/{id}/tasks/{task_id}/move` — returns the applied move.
pub async fn move_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<MoveRequest>,
) -> Result<Json<TaskMoved>, StatusCode> {
    let moved = board::move_task(&state, &auth.user, board_id, task_id, body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(moved))
}

/// `POST /api/boards/{id}/tasks/{task_id}/suggest` — AI priority/deadline.
pub async fn suggest_task(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<TaskCard>, StatusCode> {
    let task = suggest::suggest_task(&state, &auth.user, board_id, task_id)
        .await
        .map_err(suggest_error_to_status)?;
    Ok(Json(task.card()))
}

// =============================================================================
// COMMENTS
// =============================================================================

#[derive(Deserialize)]
pub struct CommentBody {
    pub body: String,
}

/// `GET /api/boards/{id}/tasks/{task_id}/comments` — oldest first.
pub async fn list_comments(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<Vec<CommentCard>>, StatusCode> {
    let comments = board::list_comments(&state, &auth.user, board_id, task_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(comments))
}

/// `POST /api/boards/{id}/tasks/{task_id}/comments`.
pub async fn add_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<CommentBody>,
) -> Result<impl IntoResponse, StatusCode> {
    let card = board::add_comment(&state, &auth.user, board_id, task_id, &body.body)
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(card)))
}

/// `PATCH /api/boards/{id}/tasks/{task_id}/comments/{comment_id}` — author only.
pub async fn update_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
    Json(body): Json<CommentBody>,
) -> Result<Json<CommentCard>, StatusCode> {
    let card = board::update_comment(&state, &auth.user, board_id, task_id, comment_id, &body.body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(card))
}

/// `DELETE /api/boards/{id}/tasks/{task_id}/comments/{comment_id}` — author or owner.
pub async fn delete_comment(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((board_id, task_id, comment_id)): Path<(Uuid, Uuid, Uuid)>,
) -> Result<StatusCode, StatusCode> {
    board::delete_comment(&state, &auth.user, board_id, task_id, comment_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// ACTIVITY + PRESENCE
// =============================================================================

#[derive(Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// `GET /api/boards/{id}/activities?limit=` — newest first.
pub async fn list_activities(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<ActivityRecord>>, StatusCode> {
    board::load_viewable(&state, &auth.user, board_id)
        .await
        .map_err(board_error_to_status)?;
    let rows = activity::feed(&state, board_id, query.limit)
        .await
        .map_err(|e| store_error_to_status(&e))?;
    Ok(Json(rows))
}

/// `GET /api/boards/{id}/viewers` — who is looking at the board right now.
pub async fn list_viewers(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Vec<UserPresence>>, StatusCode> {
    let viewers = connection::viewers(&state, &auth.user, board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(viewers))
}

/// `GET /api/public/boards/{public_id}` — redacted snapshot, no auth.
pub async fn public_board(
    State(state): State<AppState>,
    Path(public_id): Path<String>,
) -> Result<Json<BoardSnapshot>, StatusCode> {
    let snapshot = board::public_snapshot(&state, &public_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(snapshot))
}

#[cfg(test)]
#[path = "boards_test.rs"]
mod tests;
