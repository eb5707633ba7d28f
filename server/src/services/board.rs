//! Board service: boards, columns, tasks, members, comments, and sharing.
//!
//! DESIGN
//! ======
//! Every mutation runs the same pipeline:
//! 1. load the board and check access
//! 2. apply the change through the store
//! 3. record one activity (persisted, then `activity:created`)
//! 4. publish the entity event to the board group (and its public mirror)
//!
//! Step 4 only runs after step 3 succeeds. If the activity write fails the
//! caller sees an error and no entity event goes out, although the stored
//! change from step 2 remains.
//!
//! ORDERING
//! ========
//! Column and move edits are closures applied by the store against the
//! current document, never against the copy loaded in step 1. Indices in
//! published events come from the store's answer, so they describe what
//! actually happened even when requests race.

use std::collections::HashMap;

use frames::events::{
    self, ActivityKind, ActorSummary, BoardDeleted, BoardSnapshot, BoardSummary, ColumnCard, ColumnCreated, ColumnDeleted,
    ColumnUpdated, CommentCard, CommentChanged, CommentDeleted, MemberChanged, Priority, TaskCreated, TaskDeleted,
    TaskMoved, TaskUpdated,
};
use frames::{ErrorCode, Frame, now_ms};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use super::activity::{self, ActivityError};
use super::session::bytes_to_hex;
use crate::state::AppState;
use crate::store::{Board, Column, Comment, EditError, StoreError, Task, User};

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("board not found: {0}")]
    BoardNotFound(Uuid),
    #[error("column not found: {0}")]
    ColumnNotFound(Uuid),
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),
    #[error("comment not found: {0}")]
    CommentNotFound(Uuid),
    #[error("user not found: {0}")]
    UserNotFound(String),
    #[error("connection not found: {0}")]
    ConnectionNotFound(Uuid),
    #[error("not allowed")]
    Forbidden,
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Activity(#[from] ActivityError),
}

impl From<StoreError> for BoardError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Rejected(EditError::ColumnNotFound(id)) => Self::ColumnNotFound(id),
            StoreError::Rejected(e @ EditError::TaskNotInColumn { .. }) => Self::Conflict(e.to_string()),
            StoreError::Rejected(e @ EditError::IndexOutOfRange { .. }) => Self::Invalid(e.to_string()),
            StoreError::Rejected(EditError::Invalid(msg)) => Self::Invalid(msg),
            other => Self::Store(other),
        }
    }
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::BoardNotFound(_)
            | Self::ColumnNotFound(_)
            | Self::TaskNotFound(_)
            | Self::CommentNotFound(_)
            | Self::UserNotFound(_)
            | Self::ConnectionNotFound(_) => "E_NOT_FOUND",
            Self::Forbidden => "E_FORBIDDEN",
            Self::Invalid(_) => "E_INVALID",
            Self::Conflict(_) => "E_CONFLICT",
            Self::Store(e) => e.error_code(),
            Self::Activity(e) => e.error_code(),
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Store(e) => e.retryable(),
            Self::Activity(e) => e.retryable(),
            _ => false,
        }
    }
}

// =============================================================================
// REQUEST TYPES
// =============================================================================

/// Distinguish an absent field from an explicit `null`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewBoard {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardPatch {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub priority: Option<Priority>,
    pub due_date: Option<String>,
    pub assignee_id: Option<Uuid>,
    /// Index in the column; defaults to the end.
    pub position: Option<usize>,
}

/// Partial task update. For nullable fields, `null` clears the value and an
/// absent key leaves it unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub priority: Option<Option<Priority>>,
    #[serde(default, deserialize_with = "double_option")]
    pub due_date: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub assignee_id: Option<Option<Uuid>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct MoveRequest {
    pub source_column_id: Uuid,
    pub destination_column_id: Uuid,
    /// Where the client believed the task was. Only range-checked; the
    /// published event carries the real index.
    #[serde(default)]
    pub source_index: Option<usize>,
    pub destination_index: usize,
}

/// Identify a user to add by id or by e-mail.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberRef {
    pub user_id: Option<Uuid>,
    pub email: Option<String>,
}

/// Board row for list endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardListItem {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner_id: Uuid,
    pub is_public: bool,
    pub updated_at: i64,
}

impl From<&Board> for BoardListItem {
    fn from(board: &Board) -> Self {
        Self {
            id: board.id,
            title: board.title.clone(),
            description: board.description.clone(),
            owner_id: board.owner_id,
            is_public: board.is_public,
            updated_at: board.updated_at,
        }
    }
}

// =============================================================================
// HELPERS
// =============================================================================

fn non_empty(field: &str, value: &str) -> Result<String, BoardError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(BoardError::Invalid(format!("{field} is required")));
    }
    Ok(trimmed.to_string())
}

fn summary(board: &Board) -> BoardSummary {
    BoardSummary {
        board_id: board.id,
        title: board.title.clone(),
        description: board.description.clone(),
        is_public: board.is_public,
    }
}

fn generate_public_id() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes_to_hex(&bytes)
}

async fn load_board(state: &AppState, board_id: Uuid) -> Result<Board, BoardError> {
    state
        .store
        .get_board(board_id)
        .await?
        .ok_or(BoardError::BoardNotFound(board_id))
}

/// Load a board the actor may read. Boards they cannot see are reported as
/// missing.
pub(crate) async fn load_viewable(state: &AppState, actor: &User, board_id: Uuid) -> Result<Board, BoardError> {
    let board = load_board(state, board_id).await?;
    if !board.can_view(actor.id) {
        return Err(BoardError::BoardNotFound(board_id));
    }
    Ok(board)
}

pub(crate) async fn load_editable(state: &AppState, actor: &User, board_id: Uuid) -> Result<Board, BoardError> {
    let board = load_viewable(state, actor, board_id).await?;
    if !board.can_edit(actor.id) {
        return Err(BoardError::Forbidden);
    }
    Ok(board)
}

async fn load_owned(state: &AppState, actor: &User, board_id: Uuid) -> Result<Board, BoardError> {
    let board = load_viewable(state, actor, board_id).await?;
    if !board.is_owner(actor.id) {
        return Err(BoardError::Forbidden);
    }
    Ok(board)
}

pub(crate) async fn load_task(state: &AppState, board_id: Uuid, task_id: Uuid) -> Result<Task, BoardError> {
    state
        .store
        .get_task(board_id, task_id)
        .await?
        .ok_or(BoardError::TaskNotFound(task_id))
}

async fn modify(
    state: &AppState,
    board_id: Uuid,
    edit: impl FnOnce(&mut Board) -> Result<(), EditError> + Send + 'static,
) -> Result<Board, BoardError> {
    state
        .store
        .modify_board(board_id, Box::new(edit))
        .await?
        .ok_or(BoardError::BoardNotFound(board_id))
}

async fn log(
    state: &AppState,
    board_id: Uuid,
    actor: &User,
    kind: ActivityKind,
    details: serde_json::Value,
) -> Result<(), BoardError> {
    activity::record(state, board_id, actor.summary(), kind, details).await?;
    Ok(())
}

/// Outcome of reverting a store change whose activity could not be recorded.
/// The request fails either way; a failed revert is only logged.
fn report_undo<T, E: std::fmt::Display>(board_id: Uuid, change: &str, result: Result<T, E>) {
    match result {
        Ok(_) => info!(%board_id, change, "change reverted after failed activity write"),
        Err(e) => error!(%board_id, change, error = %e, "could not revert change after failed activity write"),
    }
}

async fn publish(state: &AppState, board_id: Uuid, syscall: &str, payload: &impl Serialize) {
    let frame = Frame::event(syscall, payload).with_board_id(board_id);
    state.channel.publish_board_event(board_id, &frame).await;
}

fn placement(board: &Board, task_id: Uuid) -> Result<(Uuid, usize), BoardError> {
    board
        .locate_task(task_id)
        .ok_or(BoardError::TaskNotFound(task_id))
}

fn column_title(board: &Board, column_id: Uuid) -> String {
    board
        .column(column_id)
        .map(|c| c.title.clone())
        .unwrap_or_default()
}

/// Publish `task:updated` with the task's current placement.
pub(crate) async fn publish_task_updated(state: &AppState, board: &Board, task: &Task) -> Result<(), BoardError> {
    let (column_id, position) = placement(board, task.id)?;
    publish(
        state,
        board.id,
        events::TASK_UPDATED,
        &TaskUpdated { board_id: board.id, column_id, position, task: task.card() },
    )
    .await;
    Ok(())
}

// =============================================================================
// BOARDS
// =============================================================================

/// Create a board with the default columns.
///
/// # Errors
///
/// `Invalid` for an empty title; store and activity failures propagate.
pub async fn create_board(state: &AppState, actor: &User, req: NewBoard) -> Result<Board, BoardError> {
    let title = non_empty("title", &req.title)?;
    let board = Board::new(actor.id, title, req.description.trim(), now_ms());
    state.store.insert_board(&board).await?;
    log(state, board.id, actor, ActivityKind::BoardCreated, json!({ "title": board.title })).await?;
    info!(board_id = %board.id, user_id = %actor.id, "board created");
    Ok(board)
}

/// Boards the actor owns or is a member of.
///
/// # Errors
///
/// Propagates store failures.
pub async fn list_boards(state: &AppState, actor: &User) -> Result<Vec<BoardListItem>, BoardError> {
    let boards = state.store.list_boards_for_user(actor.id).await?;
    Ok(boards.iter().map(BoardListItem::from).collect())
}

/// Full board state for a viewer.
///
/// # Errors
///
/// `BoardNotFound` when missing or not visible to the actor.
pub async fn get_board(state: &AppState, actor: &User, board_id: Uuid) -> Result<BoardSnapshot, BoardError> {
    let board = load_viewable(state, actor, board_id).await?;
    let tasks = state.store.list_tasks(board_id).await?;
    Ok(board.snapshot(&tasks))
}

/// # Errors
///
/// `Forbidden` for non-members, `Invalid` for an empty title.
pub async fn update_board(state: &AppState, actor: &User, board_id: Uuid, patch: BoardPatch) -> Result<Board, BoardError> {
    load_editable(state, actor, board_id).await?;
    let title = patch.title.as_deref().map(|t| non_empty("title", t)).transpose()?;
    let description = patch.description.map(|d| d.trim().to_string());
    let mut changes: Vec<&str> = Vec::new();
    if title.is_some() {
        changes.push("title");
    }
    if description.is_some() {
        changes.push("description");
    }

    let board = modify(state, board_id, move |b| {
        if let Some(title) = title {
            b.title = title;
        }
        if let Some(description) = description {
            b.description = description;
        }
        Ok(())
    })
    .await?;

    log(state, board_id, actor, ActivityKind::BoardUpdated, json!({ "title": board.title, "changes": changes })).await?;
    publish(state, board_id, events::BOARD_UPDATED, &summary(&board)).await;
    Ok(board)
}

/// Delete a board and everything on it. Owner only.
///
/// The activity is recorded before the delete because the delete cascades
/// to the board's activity rows.
///
/// # Errors
///
/// `Forbidden` for non-owners.
pub async fn delete_board(state: &AppState, actor: &User, board_id: Uuid) -> Result<(), BoardError> {
    let board = load_owned(state, actor, board_id).await?;
    log(state, board_id, actor, ActivityKind::BoardDeleted, json!({ "title": board.title })).await?;
    if !state.store.delete_board(board_id).await? {
        return Err(BoardError::BoardNotFound(board_id));
    }
    publish(state, board_id, events::BOARD_DELETED, &BoardDeleted { board_id }).await;
    state.channel.unshare(board_id).await;
    info!(%board_id, user_id = %actor.id, "board deleted");
    Ok(())
}

/// Enable or revoke public sharing. Owner only. Enabling keeps an existing
/// public id; revoking forgets it so a later share gets a fresh one.
///
/// # Errors
///
/// `Forbidden` for non-owners.
pub async fn set_sharing(state: &AppState, actor: &User, board_id: Uuid, enable: bool) -> Result<Board, BoardError> {
    load_owned(state, actor, board_id).await?;
    let fresh_id = generate_public_id();
    let board = modify(state, board_id, move |b| {
        b.is_public = enable;
        b.public_id = if enable { b.public_id.take().or(Some(fresh_id)) } else { None };
        Ok(())
    })
    .await?;

    let kind = if enable { ActivityKind::BoardSharedPublicly } else { ActivityKind::BoardSharingRevoked };
    log(state, board_id, actor, kind, json!({ "title": board.title })).await?;

    match (&board.public_id, enable) {
        (Some(public_id), true) => state.channel.share(board_id, public_id).await,
        _ => {
            state.channel.unshare(board_id).await;
        }
    }
    publish(state, board_id, events::BOARD_UPDATED, &summary(&board)).await;
    Ok(board)
}

/// Redacted snapshot for anonymous viewers of a shared board.
///
/// # Errors
///
/// `BoardNotFound` when the id is unknown or sharing is off.
pub async fn public_snapshot(state: &AppState, public_id: &str) -> Result<BoardSnapshot, BoardError> {
    let board = state
        .store
        .get_board_by_public_id(public_id)
        .await?
        .filter(|b| b.is_public)
        .ok_or(BoardError::BoardNotFound(Uuid::nil()))?;
    let tasks = state.store.list_tasks(board.id).await?;
    let mut snapshot = board.snapshot(&tasks);
    snapshot.owner_id = None;
    snapshot.members.clear();
    for task in &mut snapshot.tasks {
        task.assignee_id = None;
    }
    Ok(snapshot)
}

// =============================================================================
// MEMBERS
// =============================================================================

/// # Errors
///
/// `UserNotFound` for an unknown user, `Invalid` when they already belong
/// to the board.
pub async fn add_member(state: &AppState, actor: &User, board_id: Uuid, member: MemberRef) -> Result<User, BoardError> {
    load_editable(state, actor, board_id).await?;
    let user = match (member.user_id, member.email.as_deref()) {
        (Some(id), _) => state
            .store
            .get_user(id)
            .await?
            .ok_or_else(|| BoardError::UserNotFound(id.to_string()))?,
        (None, Some(email)) if !email.trim().is_empty() => state
            .store
            .find_user_by_email(email.trim())
            .await?
            .ok_or_else(|| BoardError::UserNotFound(email.trim().to_string()))?,
        _ => return Err(BoardError::Invalid("user_id or email is required".into())),
    };

    let user_id = user.id;
    modify(state, board_id, move |b| {
        if b.can_edit(user_id) {
            return Err(EditError::Invalid("user is already a member or owner of this board".into()));
        }
        b.members.push(user_id);
        Ok(())
    })
    .await?;

    log(state, board_id, actor, ActivityKind::MemberAdded, json!({ "user_id": user.id, "name": user.name })).await?;
    publish(state, board_id, events::BOARD_MEMBER_ADDED, &MemberChanged { board_id, user: user.summary() }).await;
    Ok(user)
}

/// # Errors
///
/// `Invalid` when removing the owner, `UserNotFound` when not a member.
pub async fn remove_member(state: &AppState, actor: &User, board_id: Uuid, user_id: Uuid) -> Result<(), BoardError> {
    let board = load_editable(state, actor, board_id).await?;
    if board.is_owner(user_id) {
        return Err(BoardError::Invalid("cannot remove board owner".into()));
    }
    if !board.members.contains(&user_id) {
        return Err(BoardError::UserNotFound(user_id.to_string()));
    }
    modify(state, board_id, move |b| {
        b.members.retain(|m| *m != user_id);
        Ok(())
    })
    .await?;

    let removed = state.store.get_user(user_id).await?.map_or_else(
        || ActorSummary { id: user_id, name: String::new(), avatar_url: None },
        |u| u.summary(),
    );
    log(state, board_id, actor, ActivityKind::MemberRemoved, json!({ "user_id": user_id, "name": removed.name })).await?;
    publish(state, board_id, events::BOARD_MEMBER_REMOVED, &MemberChanged { board_id, user: removed }).await;
    Ok(())
}

// =============================================================================
// COLUMNS
// =============================================================================

/// # Errors
///
/// `Invalid` for an empty title or an out-of-range position.
pub async fn create_column(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    title: &str,
    position: Option<usize>,
) -> Result<ColumnCard, BoardError> {
    load_editable(state, actor, board_id).await?;
    let column = Column::new(non_empty("title", title)?);
    let column_id = column.id;
    let inserted = column.clone();
    let board = modify(state, board_id, move |b| {
        let index = position.unwrap_or(b.columns.len());
        if index > b.columns.len() {
            return Err(EditError::IndexOutOfRange { index, max: b.columns.len() });
        }
        b.columns.insert(index, inserted);
        Ok(())
    })
    .await?;
    let position = board
        .columns
        .iter()
        .position(|c| c.id == column_id)
        .ok_or(BoardError::ColumnNotFound(column_id))?;

    let details = json!({ "column_id": column_id, "title": column.title });
    if let Err(e) = log(state, board_id, actor, ActivityKind::ColumnCreated, details).await {
        let undone = modify(state, board_id, move |b| {
            b.columns.retain(|c| c.id != column_id);
            Ok(())
        })
        .await;
        report_undo(board_id, "column create", undone);
        return Err(e);
    }
    let card = column.card();
    publish(state, board_id, events::COLUMN_CREATED, &ColumnCreated { board_id, position, column: card.clone() }).await;
    Ok(card)
}

/// # Errors
///
/// `ColumnNotFound` for an unknown column.
pub async fn rename_column(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    column_id: Uuid,
    title: &str,
) -> Result<ColumnCard, BoardError> {
    let before = load_editable(state, actor, board_id).await?;
    let title = non_empty("title", title)?;
    let previous_title = column_title(&before, column_id);
    let new_title = title.clone();
    let board = modify(state, board_id, move |b| {
        let column = b
            .columns
            .iter_mut()
            .find(|c| c.id == column_id)
            .ok_or(EditError::ColumnNotFound(column_id))?;
        column.title = new_title;
        Ok(())
    })
    .await?;
    let card = board
        .column(column_id)
        .map(Column::card)
        .ok_or(BoardError::ColumnNotFound(column_id))?;

    let details = json!({ "column_id": column_id, "title": title, "previous_title": previous_title });
    if let Err(e) = log(state, board_id, actor, ActivityKind::ColumnUpdated, details).await {
        let undone = modify(state, board_id, move |b| {
            if let Some(column) = b.columns.iter_mut().find(|c| c.id == column_id) {
                column.title = previous_title;
            }
            Ok(())
        })
        .await;
        report_undo(board_id, "column rename", undone);
        return Err(e);
    }
    publish(state, board_id, events::COLUMN_UPDATED, &ColumnUpdated { board_id, column_id, title }).await;
    Ok(card)
}

/// Delete a column and every task in it.
///
/// # Errors
///
/// `ColumnNotFound` for an unknown column.
pub async fn delete_column(state: &AppState, actor: &User, board_id: Uuid, column_id: Uuid) -> Result<(), BoardError> {
    let before = load_editable(state, actor, board_id).await?;
    let board = modify(state, board_id, move |b| {
        let before = b.columns.len();
        b.columns.retain(|c| c.id != column_id);
        if b.columns.len() == before {
            return Err(EditError::ColumnNotFound(column_id));
        }
        Ok(())
    })
    .await?;

    // Anything no longer placed in a column went with the deleted one.
    let orphans: Vec<Uuid> = state
        .store
        .list_tasks(board_id)
        .await?
        .into_iter()
        .filter(|t| board.locate_task(t.id).is_none())
        .map(|t| t.id)
        .collect();
    for task_id in &orphans {
        state.store.delete_task(board_id, *task_id).await?;
    }

    log(
        state,
        board_id,
        actor,
        ActivityKind::ColumnDeleted,
        json!({ "column_id": column_id, "title": column_title(&before, column_id), "task_count": orphans.len() }),
    )
    .await?;
    publish(state, board_id, events::COLUMN_DELETED, &ColumnDeleted { board_id, column_id }).await;
    Ok(())
}

// =============================================================================
// TASKS
// =============================================================================

fn check_assignee(board: &Board, assignee_id: Option<Uuid>) -> Result<(), BoardError> {
    match assignee_id {
        Some(id) if !board.can_edit(id) => Err(BoardError::Invalid("assignee must be a board member".into())),
        _ => Ok(()),
    }
}

/// Create a task in a column.
///
/// # Errors
///
/// `ColumnNotFound`, or `Invalid` for an empty title, a non-member
/// assignee, or an out-of-range position.
pub async fn create_task(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    column_id: Uuid,
    req: NewTask,
) -> Result<(Task, usize), BoardError> {
    let before = load_editable(state, actor, board_id).await?;
    if before.column(column_id).is_none() {
        return Err(BoardError::ColumnNotFound(column_id));
    }
    check_assignee(&before, req.assignee_id)?;
    let now = now_ms();
    let task = Task {
        id: Uuid::new_v4(),
        board_id,
        title: non_empty("title", &req.title)?,
        description: req.description.trim().to_string(),
        priority: req.priority,
        due_date: req.due_date,
        assignee_id: req.assignee_id,
        suggestion: None,
        created_by: actor.id,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_task(&task).await?;

    let task_id = task.id;
    let placed = modify(state, board_id, move |b| b.insert_task(column_id, task_id, req.position).map(|_| ())).await;
    let board = match placed {
        Ok(board) => board,
        Err(e) => {
            state.store.delete_task(board_id, task_id).await?;
            return Err(e);
        }
    };
    let (column_id, position) = placement(&board, task_id)?;

    let details = json!({
        "task_id": task_id,
        "title": task.title,
        "column_id": column_id,
        "column_title": column_title(&board, column_id),
    });
    if let Err(e) = log(state, board_id, actor, ActivityKind::TaskCreated, details).await {
        let unplaced = modify(state, board_id, move |b| {
            b.remove_task(task_id);
            Ok(())
        })
        .await;
        report_undo(board_id, "task create", unplaced);
        report_undo(board_id, "task create", state.store.delete_task(board_id, task_id).await);
        return Err(e);
    }
    publish(state, board_id, events::TASK_CREATED, &TaskCreated { board_id, column_id, position, task: task.card() })
        .await;
    Ok((task, position))
}

/// Apply a partial update to a task's fields.
///
/// # Errors
///
/// `TaskNotFound`, or `Invalid` for an empty title or non-member assignee.
pub async fn update_task(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
    patch: TaskPatch,
) -> Result<Task, BoardError> {
    let board = load_editable(state, actor, board_id).await?;
    let mut task = load_task(state, board_id, task_id).await?;
    let original = task.clone();
    let mut changes: Vec<&str> = Vec::new();

    if let Some(title) = patch.title {
        task.title = non_empty("title", &title)?;
        changes.push("title");
    }
    if let Some(description) = patch.description {
        task.description = description.trim().to_string();
        changes.push("description");
    }
    if let Some(priority) = patch.priority {
        task.priority = priority;
        changes.push("priority");
    }
    if let Some(due_date) = patch.due_date {
        task.due_date = due_date;
        changes.push("due_date");
    }
    if let Some(assignee_id) = patch.assignee_id {
        check_assignee(&board, assignee_id)?;
        task.assignee_id = assignee_id;
        changes.push("assignee_id");
    }
    task.updated_at = now_ms();
    state.store.save_task(&task).await?;

    let details = json!({ "task_id": task_id, "title": task.title, "changes": changes });
    if let Err(e) = log(state, board_id, actor, ActivityKind::TaskUpdated, details).await {
        report_undo(board_id, "task update", state.store.save_task(&original).await);
        return Err(e);
    }
    // Re-read placement; a move may have landed while we were saving.
    let board = load_board(state, board_id).await?;
    publish_task_updated(state, &board, &task).await?;
    Ok(task)
}

/// # Errors
///
/// `TaskNotFound` for an unknown task.
pub async fn delete_task(state: &AppState, actor: &User, board_id: Uuid, task_id: Uuid) -> Result<(), BoardError> {
    load_editable(state, actor, board_id).await?;
    let task = load_task(state, board_id, task_id).await?;
    let before = load_board(state, board_id).await?;
    let placed_at = placement(&before, task_id).ok();
    let (column_id, _) = placed_at.unwrap_or((Uuid::nil(), 0));

    modify(state, board_id, move |b| {
        b.remove_task(task_id);
        Ok(())
    })
    .await?;
    state.store.delete_task(board_id, task_id).await?;

    let details = json!({
        "task_id": task_id,
        "title": task.title,
        "column_id": column_id,
        "column_title": column_title(&before, column_id),
    });
    if let Err(e) = log(state, board_id, actor, ActivityKind::TaskDeleted, details).await {
        report_undo(board_id, "task delete", state.store.insert_task(&task).await);
        if let Some((column_id, index)) = placed_at {
            let replaced = modify(state, board_id, move |b| {
                let len = b.column(column_id).map_or(0, |c| c.task_ids.len());
                b.insert_task(column_id, task_id, Some(index.min(len))).map(|_| ())
            })
            .await;
            report_undo(board_id, "task delete", replaced);
        }
        return Err(e);
    }
    publish(state, board_id, events::TASK_DELETED, &TaskDeleted { board_id, column_id, task_id }).await;
    Ok(())
}

/// Move a task within or between columns.
///
/// # Errors
///
/// `TaskNotFound`/`ColumnNotFound` for unknown ids, `Conflict` when the
/// task is no longer in the source column, `Invalid` for out-of-range
/// indices.
pub async fn move_task(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
    req: MoveRequest,
) -> Result<TaskMoved, BoardError> {
    let before = load_editable(state, actor, board_id).await?;
    let task = load_task(state, board_id, task_id).await?;
    let source = before
        .column(req.source_column_id)
        .ok_or(BoardError::ColumnNotFound(req.source_column_id))?;
    if before.column(req.destination_column_id).is_none() {
        return Err(BoardError::ColumnNotFound(req.destination_column_id));
    }
    if let Some(index) = req.source_index {
        if index >= source.task_ids.len() {
            return Err(BoardError::Invalid(format!("source index {index} out of range")));
        }
    }

    let (board, applied) = state
        .store
        .move_task(board_id, task_id, req.source_column_id, req.destination_column_id, req.destination_index)
        .await?
        .ok_or(BoardError::BoardNotFound(board_id))?;

    let moved = TaskMoved {
        board_id,
        task_id,
        source_column_id: req.source_column_id,
        destination_column_id: req.destination_column_id,
        source_index: applied.source_index,
        destination_index: applied.destination_index,
    };
    let details = json!({
        "task_id": task_id,
        "title": task.title,
        "source_column_id": moved.source_column_id,
        "source_column_title": column_title(&board, moved.source_column_id),
        "destination_column_id": moved.destination_column_id,
        "destination_column_title": column_title(&board, moved.destination_column_id),
        "source_index": moved.source_index,
        "destination_index": moved.destination_index,
    });
    if let Err(e) = log(state, board_id, actor, ActivityKind::TaskMoved, details).await {
        // Moving it back re-inserts at the index it was lifted from.
        let undone = state
            .store
            .move_task(board_id, task_id, moved.destination_column_id, moved.source_column_id, moved.source_index)
            .await;
        report_undo(board_id, "task move", undone);
        return Err(e);
    }
    publish(state, board_id, events::TASK_MOVED, &moved).await;
    Ok(moved)
}

// =============================================================================
// COMMENTS
// =============================================================================

async fn comment_card(state: &AppState, comment: &Comment, cache: &mut HashMap<Uuid, User>) -> Result<CommentCard, BoardError> {
    let author = match cache.get(&comment.author_id) {
        Some(user) => user.summary(),
        None => match state.store.get_user(comment.author_id).await? {
            Some(user) => {
                let summary = user.summary();
                cache.insert(user.id, user);
                summary
            }
            None => ActorSummary { id: comment.author_id, name: String::new(), avatar_url: None },
        },
    };
    Ok(CommentCard {
        id: comment.id,
        task_id: comment.task_id,
        author,
        body: comment.body.clone(),
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    })
}

fn card_for(comment: &Comment, author: &User) -> CommentCard {
    CommentCard {
        id: comment.id,
        task_id: comment.task_id,
        author: author.summary(),
        body: comment.body.clone(),
        created_at: comment.created_at,
        updated_at: comment.updated_at,
    }
}

async fn load_comment(state: &AppState, task_id: Uuid, comment_id: Uuid) -> Result<Comment, BoardError> {
    state
        .store
        .get_comment(task_id, comment_id)
        .await?
        .ok_or(BoardError::CommentNotFound(comment_id))
}

/// Comments on a task, oldest first.
///
/// # Errors
///
/// `TaskNotFound` for an unknown task.
pub async fn list_comments(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
) -> Result<Vec<CommentCard>, BoardError> {
    load_viewable(state, actor, board_id).await?;
    load_task(state, board_id, task_id).await?;
    let comments = state.store.list_comments(task_id).await?;
    let mut cache = HashMap::new();
    let mut cards = Vec::with_capacity(comments.len());
    for comment in &comments {
        cards.push(comment_card(state, comment, &mut cache).await?);
    }
    Ok(cards)
}

/// # Errors
///
/// `Invalid` for an empty body.
pub async fn add_comment(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
    body: &str,
) -> Result<CommentCard, BoardError> {
    load_editable(state, actor, board_id).await?;
    let task = load_task(state, board_id, task_id).await?;
    let now = now_ms();
    let comment = Comment {
        id: Uuid::new_v4(),
        board_id,
        task_id,
        author_id: actor.id,
        body: non_empty("comment", body)?,
        created_at: now,
        updated_at: now,
    };
    state.store.insert_comment(&comment).await?;

    log(
        state,
        board_id,
        actor,
        ActivityKind::CommentAdded,
        json!({ "task_id": task_id, "title": task.title, "comment_id": comment.id, "content": comment.body }),
    )
    .await?;
    let card = card_for(&comment, actor);
    publish(state, board_id, events::COMMENT_ADDED, &CommentChanged { board_id, comment: card.clone() }).await;
    Ok(card)
}

/// Edit a comment. Author only.
///
/// # Errors
///
/// `Forbidden` for anyone but the author.
pub async fn update_comment(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
    comment_id: Uuid,
    body: &str,
) -> Result<CommentCard, BoardError> {
    load_editable(state, actor, board_id).await?;
    load_task(state, board_id, task_id).await?;
    let mut comment = load_comment(state, task_id, comment_id).await?;
    if comment.author_id != actor.id {
        return Err(BoardError::Forbidden);
    }
    comment.body = non_empty("comment", body)?;
    comment.updated_at = now_ms();
    state.store.save_comment(&comment).await?;

    log(
        state,
        board_id,
        actor,
        ActivityKind::CommentUpdated,
        json!({ "task_id": task_id, "comment_id": comment_id, "content": comment.body }),
    )
    .await?;
    let card = card_for(&comment, actor);
    publish(state, board_id, events::COMMENT_UPDATED, &CommentChanged { board_id, comment: card.clone() }).await;
    Ok(card)
}

/// Delete a comment. Author or board owner.
///
/// # Errors
///
/// `Forbidden` for anyone else.
pub async fn delete_comment(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
    comment_id: Uuid,
) -> Result<(), BoardError> {
    let board = load_editable(state, actor, board_id).await?;
    load_task(state, board_id, task_id).await?;
    let comment = load_comment(state, task_id, comment_id).await?;
    if comment.author_id != actor.id && !board.is_owner(actor.id) {
        return Err(BoardError::Forbidden);
    }
    if !state.store.delete_comment(task_id, comment_id).await? {
        return Err(BoardError::CommentNotFound(comment_id));
    }

    log(state, board_id, actor, ActivityKind::CommentDeleted, json!({ "task_id": task_id, "comment_id": comment_id }))
        .await?;
    publish(state, board_id, events::COMMENT_DELETED, &CommentDeleted { board_id, task_id, comment_id }).await;
    Ok(())
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
