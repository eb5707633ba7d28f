//! Typed decoding of server frames.
//!
//! DESIGN
//! ======
//! Every frame the server pushes maps to exactly one [`ServerEvent`]. Public
//! mirrors (`public:task-moved`, ...) decode to the same variants as their
//! member counterparts; the payloads are the same shape minus redacted
//! fields. Replies to client requests come back as [`ServerEvent::Reply`]
//! so the caller can correlate them by `parent_id`.

#[cfg(test)]
#[path = "events_test.rs"]
mod events_test;

use frames::events::{
    self, ActivityRecord, BoardDeleted, BoardSummary, ColumnCreated, ColumnDeleted, ColumnUpdated, CommentChanged,
    CommentDeleted, MemberChanged, MoveIntent, PresenceUpdate, TaskCreated, TaskDeleted, TaskMoved, TaskUpdated,
};
use frames::{Frame, Status};
use serde::de::DeserializeOwned;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ClientError;

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected { connection_id: Option<Uuid>, heartbeat_interval_ms: Option<u64> },
    Presence(PresenceUpdate),
    Activity(ActivityRecord),
    TaskCreated(TaskCreated),
    TaskUpdated(TaskUpdated),
    TaskMoved(TaskMoved),
    TaskDeleted(TaskDeleted),
    MoveIntent { from: Option<String>, intent: MoveIntent },
    ColumnCreated(ColumnCreated),
    ColumnUpdated(ColumnUpdated),
    ColumnDeleted(ColumnDeleted),
    BoardUpdated(BoardSummary),
    BoardDeleted(BoardDeleted),
    MemberAdded(MemberChanged),
    MemberRemoved(MemberChanged),
    CommentAdded(CommentChanged),
    CommentUpdated(CommentChanged),
    CommentDeleted(CommentDeleted),
    PublicRevoked { public_id: Option<String> },
    /// Terminal reply to a request this client sent.
    Reply { parent_id: Uuid, result: Result<Value, ClientError> },
    /// A syscall this client does not know. Ignored by callers.
    Other(String),
}

impl ServerEvent {
    /// Decode a server frame.
    ///
    /// # Errors
    ///
    /// [`ClientError::Decode`] when a known syscall carries a payload of the
    /// wrong shape.
    pub fn from_frame(frame: &Frame) -> Result<Self, ClientError> {
        if let Some(parent_id) = frame.parent_id.filter(|_| frame.status.is_terminal()) {
            let result = match frame.status {
                Status::Error => Err(ClientError::from_error_frame(frame)),
                _ => Ok(Value::Object(frame.data.clone().into_iter().collect())),
            };
            return Ok(Self::Reply { parent_id, result });
        }

        let syscall = member_syscall(&frame.syscall);
        let event = match syscall.as_str() {
            events::SESSION_CONNECTED => Self::Connected {
                connection_id: frame.uuid_field("connection_id"),
                heartbeat_interval_ms: frame.data.get("heartbeat_interval_ms").and_then(Value::as_u64),
            },
            events::PRESENCE_UPDATE => Self::Presence(decode(frame)?),
            events::ACTIVITY_CREATED => Self::Activity(decode(frame)?),
            events::TASK_CREATED => Self::TaskCreated(decode(frame)?),
            events::TASK_UPDATED => Self::TaskUpdated(decode(frame)?),
            events::TASK_MOVED => Self::TaskMoved(decode(frame)?),
            events::TASK_DELETED => Self::TaskDeleted(decode(frame)?),
            events::TASK_MOVE_INTENT => Self::MoveIntent { from: frame.from.clone(), intent: decode(frame)? },
            events::COLUMN_CREATED => Self::ColumnCreated(decode(frame)?),
            events::COLUMN_UPDATED => Self::ColumnUpdated(decode(frame)?),
            events::COLUMN_DELETED => Self::ColumnDeleted(decode(frame)?),
            events::BOARD_UPDATED => Self::BoardUpdated(decode(frame)?),
            events::BOARD_DELETED => Self::BoardDeleted(decode(frame)?),
            events::BOARD_MEMBER_ADDED => Self::MemberAdded(decode(frame)?),
            events::BOARD_MEMBER_REMOVED => Self::MemberRemoved(decode(frame)?),
            events::COMMENT_ADDED => Self::CommentAdded(decode(frame)?),
            events::COMMENT_UPDATED => Self::CommentUpdated(decode(frame)?),
            events::COMMENT_DELETED => Self::CommentDeleted(decode(frame)?),
            events::PUBLIC_REVOKED => Self::PublicRevoked {
                public_id: frame.data.get("public_id").and_then(Value::as_str).map(str::to_owned),
            },
            _ => Self::Other(frame.syscall.clone()),
        };
        Ok(event)
    }

    /// Board the event belongs to, when it names one.
    #[must_use]
    pub fn board_id(&self) -> Option<Uuid> {
        match self {
            Self::Presence(e) => Some(e.board_id),
            Self::Activity(e) => Some(e.board_id),
            Self::TaskCreated(e) => Some(e.board_id),
            Self::TaskUpdated(e) => Some(e.board_id),
            Self::TaskMoved(e) => Some(e.board_id),
            Self::TaskDeleted(e) => Some(e.board_id),
            Self::MoveIntent { intent, .. } => Some(intent.board_id),
            Self::ColumnCreated(e) => Some(e.board_id),
            Self::ColumnUpdated(e) => Some(e.board_id),
            Self::ColumnDeleted(e) => Some(e.board_id),
            Self::BoardUpdated(e) => Some(e.board_id),
            Self::BoardDeleted(e) => Some(e.board_id),
            Self::MemberAdded(e) | Self::MemberRemoved(e) => Some(e.board_id),
            Self::CommentAdded(e) | Self::CommentUpdated(e) => Some(e.board_id),
            Self::CommentDeleted(e) => Some(e.board_id),
            Self::Connected { .. } | Self::PublicRevoked { .. } | Self::Reply { .. } | Self::Other(_) => None,
        }
    }
}

/// `public:task-moved` -> `task:moved`; anything else unchanged.
fn member_syscall(syscall: &str) -> String {
    syscall
        .strip_prefix("public:")
        .filter(|rest| *rest != "revoked")
        .and_then(|rest| rest.split_once('-'))
        .map_or_else(|| syscall.to_owned(), |(prefix, op)| format!("{prefix}:{op}"))
}

fn decode<T: DeserializeOwned>(frame: &Frame) -> Result<T, ClientError> {
    frame.decode().map_err(|e| ClientError::Decode { syscall: frame.syscall.clone(), message: e.to_string() })
}
