//! Activity recorder: append an immutable record, then announce it.
//!
//! DESIGN
//! ======
//! Every board mutation ends with exactly one activity record. The record
//! is persisted first and only then published as `activity:created` to the
//! board group. If persistence fails nothing is published and the error
//! propagates, so the enclosing mutation is reported as failed.
//!
//! Actor name and avatar are copied into the record at write time; later
//! profile edits do not rewrite history.

use frames::events::{self, ActivityKind, ActivityRecord, ActorSummary};
use frames::{ErrorCode, Frame, now_ms};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::channel::Group;
use crate::config::env_parse;
use crate::state::AppState;
use crate::store::StoreError;

pub const DEFAULT_ACTIVITY_FEED_LIMIT: usize = 50;
/// Upper bound on `?limit=` for the feed endpoint.
pub const MAX_ACTIVITY_FEED_LIMIT: usize = 200;

/// Read `ACTIVITY_FEED_LIMIT`.
#[must_use]
pub fn feed_limit_from_env() -> usize {
    env_parse("ACTIVITY_FEED_LIMIT", DEFAULT_ACTIVITY_FEED_LIMIT).clamp(1, MAX_ACTIVITY_FEED_LIMIT)
}

#[derive(Debug, thiserror::Error)]
#[error("activity not recorded: {0}")]
pub struct ActivityError(#[from] pub StoreError);

impl ErrorCode for ActivityError {
    fn error_code(&self) -> &'static str {
        "E_ACTIVITY_NOT_RECORDED"
    }

    fn retryable(&self) -> bool {
        self.0.retryable()
    }
}

/// Persist an activity record and publish it to the board's viewers.
///
/// # Errors
///
/// Returns [`ActivityError`] when the store rejects the write; nothing is
/// published in that case.
pub async fn record(
    state: &AppState,
    board_id: Uuid,
    actor: ActorSummary,
    kind: ActivityKind,
    details: Value,
) -> Result<ActivityRecord, ActivityError> {
    let record = ActivityRecord { id: Uuid::new_v4(), board_id, actor, kind, details, created_at: now_ms() };
    if let Err(e) = state.store.insert_activity(&record).await {
        warn!(%board_id, kind = kind.as_str(), error = %e, "activity write failed");
        return Err(ActivityError(e));
    }

    let frame = Frame::event(events::ACTIVITY_CREATED, &record).with_board_id(board_id);
    let delivered = state.channel.publish(&Group::Board(board_id), &frame).await;
    debug!(%board_id, kind = kind.as_str(), delivered, "activity recorded");
    Ok(record)
}

/// Newest-first activity for a board. `limit` defaults to the configured
/// feed size and is clamped to `1..=MAX_ACTIVITY_FEED_LIMIT`.
///
/// # Errors
///
/// Propagates store failures.
pub async fn feed(state: &AppState, board_id: Uuid, limit: Option<usize>) -> Result<Vec<ActivityRecord>, StoreError> {
    let limit = limit
        .unwrap_or(state.activity_feed_limit)
        .clamp(1, MAX_ACTIVITY_FEED_LIMIT);
    state.store.list_activities(board_id, limit).await
}

#[cfg(test)]
#[path = "activity_test.rs"]
mod tests;
