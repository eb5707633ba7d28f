//! Typed payloads for board, presence, and activity events.
//!
//! The server builds frames from these with [`Frame::event`](crate::Frame::event)
//! and clients read them back with [`Frame::decode`](crate::Frame::decode). Field
//! names are the wire names; all ids are UUID strings on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// SYSCALLS
// =============================================================================

pub const SESSION_CONNECTED: &str = "session:connected";
pub const SESSION_HEARTBEAT: &str = "session:heartbeat";

pub const BOARD_JOIN: &str = "board:join";
pub const BOARD_LEAVE: &str = "board:leave";
pub const BOARD_UPDATED: &str = "board:updated";
pub const BOARD_DELETED: &str = "board:deleted";
pub const BOARD_MEMBER_ADDED: &str = "board:member-added";
pub const BOARD_MEMBER_REMOVED: &str = "board:member-removed";

pub const PRESENCE_UPDATE: &str = "presence:update";
pub const ACTIVITY_CREATED: &str = "activity:created";

pub const TASK_CREATED: &str = "task:created";
pub const TASK_UPDATED: &str = "task:updated";
pub const TASK_MOVED: &str = "task:moved";
pub const TASK_DELETED: &str = "task:deleted";
pub const TASK_MOVE_INTENT: &str = "task:move-intent";

pub const COLUMN_CREATED: &str = "column:created";
pub const COLUMN_UPDATED: &str = "column:updated";
pub const COLUMN_DELETED: &str = "column:deleted";

pub const COMMENT_ADDED: &str = "comment:added";
pub const COMMENT_UPDATED: &str = "comment:updated";
pub const COMMENT_DELETED: &str = "comment:deleted";

pub const PUBLIC_REVOKED: &str = "public:revoked";

/// Data keys removed from payloads mirrored to public share viewers.
pub const REDACTED_KEYS: &[&str] = &[
    "assignee",
    "assignee_id",
    "attachments",
    "comments",
    "activity",
    "members",
    "owner_id",
];

/// Map a board event syscall to its public mirror, if it has one.
///
/// Only task and column events are mirrored; `task:moved` becomes
/// `public:task-moved`.
#[must_use]
pub fn public_syscall(syscall: &str) -> Option<String> {
    let (prefix, op) = syscall.split_once(':')?;
    match (prefix, op) {
        ("task", "created" | "updated" | "moved" | "deleted")
        | ("column", "created" | "updated" | "deleted") => Some(format!("public:{prefix}-{op}")),
        _ => None,
    }
}

/// Strip member-only fields from a JSON value, recursively.
pub fn redact_public(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for key in REDACTED_KEYS {
                map.remove(*key);
            }
            for nested in map.values_mut() {
                redact_public(nested);
            }
        }
        Value::Array(items) => items.iter_mut().for_each(redact_public),
        _ => {}
    }
}

// =============================================================================
// PRESENCE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

/// A user as seen by other viewers of a board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPresence {
    pub user_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    pub status: PresenceStatus,
    /// Latest heartbeat across the user's live connections, ms since epoch.
    pub last_seen: i64,
}

/// `presence:update` payload: the full viewer list, never a delta.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceUpdate {
    pub board_id: Uuid,
    pub users: Vec<UserPresence>,
}

// =============================================================================
// ACTIVITY
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    BoardCreated,
    BoardUpdated,
    BoardDeleted,
    ColumnCreated,
    ColumnUpdated,
    ColumnDeleted,
    TaskCreated,
    TaskUpdated,
    TaskMoved,
    TaskDeleted,
    CommentAdded,
    CommentUpdated,
    CommentDeleted,
    MemberAdded,
    MemberRemoved,
    UserJoinedBoard,
    UserLeftBoard,
    BoardSharedPublicly,
    BoardSharingRevoked,
}

impl ActivityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BoardCreated => "board_created",
            Self::BoardUpdated => "board_updated",
            Self::BoardDeleted => "board_deleted",
            Self::ColumnCreated => "column_created",
            Self::ColumnUpdated => "column_updated",
            Self::ColumnDeleted => "column_deleted",
            Self::TaskCreated => "task_created",
            Self::TaskUpdated => "task_updated",
            Self::TaskMoved => "task_moved",
            Self::TaskDeleted => "task_deleted",
            Self::CommentAdded => "comment_added",
            Self::CommentUpdated => "comment_updated",
            Self::CommentDeleted => "comment_deleted",
            Self::MemberAdded => "member_added",
            Self::MemberRemoved => "member_removed",
            Self::UserJoinedBoard => "user_joined_board",
            Self::UserLeftBoard => "user_left_board",
            Self::BoardSharedPublicly => "board_shared_publicly",
            Self::BoardSharingRevoked => "board_sharing_revoked",
        }
    }
}

impl std::str::FromStr for ActivityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_owned())).map_err(|_| format!("unknown activity kind: {s}"))
    }
}

/// Denormalized actor captured at action time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// `activity:created` payload and feed row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub board_id: Uuid,
    pub actor: ActorSummary,
    pub kind: ActivityKind,
    #[serde(default)]
    pub details: Value,
    pub created_at: i64,
}

// =============================================================================
// TASKS + COLUMNS
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// AI-produced suggestion stored alongside a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskSuggestion {
    pub priority: Priority,
    /// ISO date (`YYYY-MM-DD`).
    pub deadline: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCard {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<TaskSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCard {
    pub id: Uuid,
    pub title: String,
    /// Ordered task ids; index in this list is the task's position.
    pub task_ids: Vec<Uuid>,
}

/// `task:moved` payload. `source_index` is where the task actually was when
/// the move was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMoved {
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub source_column_id: Uuid,
    pub destination_column_id: Uuid,
    pub source_index: usize,
    pub destination_index: usize,
}

/// `task:created` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCreated {
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub position: usize,
    pub task: TaskCard,
}

/// `task:updated` payload. Carries the current placement so a client holding
/// a stale guess can correct it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskUpdated {
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub position: usize,
    pub task: TaskCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDeleted {
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub task_id: Uuid,
}

/// `task:move-intent` payload relayed to peers before the move is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveIntent {
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub source_column_id: Uuid,
    pub destination_column_id: Uuid,
    pub source_index: usize,
    pub destination_index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnCreated {
    pub board_id: Uuid,
    pub position: usize,
    pub column: ColumnCard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnUpdated {
    pub board_id: Uuid,
    pub column_id: Uuid,
    pub title: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDeleted {
    pub board_id: Uuid,
    pub column_id: Uuid,
}

// =============================================================================
// BOARD
// =============================================================================

/// Complete board state as served by `GET /api/boards/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub members: Vec<Uuid>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_id: Option<String>,
    pub columns: Vec<ColumnCard>,
    pub tasks: Vec<TaskCard>,
    pub updated_at: i64,
}

/// `board:updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSummary {
    pub board_id: Uuid,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_public: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardDeleted {
    pub board_id: Uuid,
}

/// `board:member-added` / `board:member-removed` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberChanged {
    pub board_id: Uuid,
    pub user: ActorSummary,
}

// =============================================================================
// COMMENTS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentCard {
    pub id: Uuid,
    pub task_id: Uuid,
    pub author: ActorSummary,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// `comment:added` / `comment:updated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentChanged {
    pub board_id: Uuid,
    pub comment: CommentCard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentDeleted {
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub comment_id: Uuid,
}

#[cfg(test)]
#[path = "events_test.rs"]
mod tests;
