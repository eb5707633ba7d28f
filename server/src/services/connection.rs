//! Connection service: the websocket lifecycle seen by presence and the
//! broadcast channel.
//!
//! DESIGN
//! ======
//! The registry knows who is viewing what; the channel knows which socket
//! queues belong to which group. This module keeps the two in step and
//! raises `presence:update` whenever a board's viewer set (or a viewer's
//! status) changes:
//! - connect: channel queue + registry connection
//! - join: board group + viewer entry, then presence, then `user_joined_board`
//! - leave: drop the group; the viewer entry goes only when no other tab of
//!   the same user remains in the group
//! - disconnect / reap: presence for every board the user vacated, no activity;
//!   a board is vacated when no other tab of the user is still in its group
//!
//! Join and leave activities are best effort: a failed write is logged and
//! the presence change still stands.

use std::time::Duration;

use frames::events::{self, ActivityKind, MoveIntent, PresenceStatus, PresenceUpdate, UserPresence};
use frames::{Frame, now_ms};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::activity;
use super::board::{self, BoardError};
use crate::channel::Group;
use crate::presence::Identity;
use crate::state::AppState;
use crate::store::{Board, User};

#[must_use]
pub fn identity_of(user: &User) -> Identity {
    Identity { user_id: user.id, name: user.name.clone(), avatar_url: user.avatar_url.clone() }
}

// =============================================================================
// PRESENCE
// =============================================================================

/// Publish the current viewer list to a board's group.
pub async fn publish_presence(state: &AppState, board_id: Uuid) -> usize {
    let users = state.presence.board_viewers(board_id, now_ms());
    let frame = Frame::event(events::PRESENCE_UPDATE, &PresenceUpdate { board_id, users }).with_board_id(board_id);
    state.channel.publish(&Group::Board(board_id), &frame).await
}

/// Viewer list for a board the caller may see.
///
/// # Errors
///
/// `BoardNotFound` when missing or not visible to the caller.
pub async fn viewers(state: &AppState, user: &User, board_id: Uuid) -> Result<Vec<UserPresence>, BoardError> {
    board::load_viewable(state, user, board_id).await?;
    Ok(state.presence.board_viewers(board_id, now_ms()))
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Register a socket. Anonymous (public share) sockets get a channel queue
/// but no registry entry.
pub async fn connect(
    state: &AppState,
    connection_id: Uuid,
    user: Option<&User>,
    tx: mpsc::Sender<Frame>,
) -> Option<UserPresence> {
    state.channel.connect(connection_id, user.map(|u| u.id), tx).await;
    let user = user?;
    let presence = state
        .presence
        .register_connection(connection_id, &identity_of(user), now_ms());
    info!(%connection_id, user_id = %user.id, "connection registered");
    Some(presence)
}

/// Tear down a socket and republish presence for boards the user vacated.
pub async fn disconnect(state: &AppState, connection_id: Uuid) {
    let groups = state.channel.disconnect(connection_id).await;
    let Some(gone) = state.presence.unregister_connection(connection_id) else {
        return;
    };
    let vacated = vacate(state, connection_id, gone.user_id, &groups, gone.vacated_boards).await;
    info!(
        %connection_id,
        user_id = %gone.user_id,
        went_offline = gone.went_offline,
        vacated = vacated.len(),
        "connection closed"
    );
    for board_id in vacated {
        publish_presence(state, board_id).await;
    }
}

/// Boards a closed socket leaves behind. The registry already reports the
/// boards of a user's last connection; for other sockets, a board is
/// vacated when no remaining tab of the user is in its group.
async fn vacate(
    state: &AppState,
    connection_id: Uuid,
    user_id: Uuid,
    groups: &[Group],
    mut vacated: Vec<Uuid>,
) -> Vec<Uuid> {
    for group in groups {
        let Group::Board(board_id) = group else {
            continue;
        };
        if vacated.contains(board_id) || state.channel.user_in_group(user_id, group, connection_id).await {
            continue;
        }
        if state.presence.leave_board(*board_id, user_id) {
            vacated.push(*board_id);
        }
    }
    vacated
}

/// Join a board's group and viewer set. Returns the viewers after joining.
///
/// # Errors
///
/// `BoardNotFound` when the board is missing or not visible to the user;
/// `ConnectionNotFound` when the socket was already closed, reaped, or
/// evicted, in which case nothing is recorded.
pub async fn join(
    state: &AppState,
    connection_id: Uuid,
    user: &User,
    board_id: Uuid,
) -> Result<Vec<UserPresence>, BoardError> {
    let board = board::load_viewable(state, user, board_id).await?;
    let group = Group::Board(board_id);
    if state.channel.join(connection_id, group.clone()).await.is_none() {
        return Err(BoardError::ConnectionNotFound(connection_id));
    }

    let now = now_ms();
    let Some(newly_joined) = state
        .presence
        .join_board_via(connection_id, board_id, &identity_of(user), now)
    else {
        // Reaped between the two joins.
        state.channel.leave(connection_id, &group).await;
        return Err(BoardError::ConnectionNotFound(connection_id));
    };
    if let Some(public_id) = board.public_id.as_deref().filter(|_| board.is_public) {
        state.channel.share(board_id, public_id).await;
    }
    publish_presence(state, board_id).await;
    if newly_joined {
        info!(%connection_id, %board_id, user_id = %user.id, "user joined board");
        note_visit(state, &board, user, ActivityKind::UserJoinedBoard).await;
    }
    Ok(state.presence.board_viewers(board_id, now))
}

/// Subscribe an anonymous socket to a shared board's public group.
///
/// # Errors
///
/// `BoardNotFound` when the public id is unknown or sharing is off;
/// `ConnectionNotFound` when the socket is already gone.
pub async fn join_public(
    state: &AppState,
    connection_id: Uuid,
    public_id: &str,
) -> Result<events::BoardSnapshot, BoardError> {
    let snapshot = board::public_snapshot(state, public_id).await?;
    state
        .channel
        .join(connection_id, Group::PublicShare(public_id.to_string()))
        .await
        .ok_or(BoardError::ConnectionNotFound(connection_id))?;
    state.channel.share(snapshot.id, public_id).await;
    debug!(%connection_id, public_id, "public viewer joined");
    Ok(snapshot)
}

/// Leave a board's group. Returns false when the socket was not in it.
pub async fn leave(state: &AppState, connection_id: Uuid, user: &User, board_id: Uuid) -> bool {
    let group = Group::Board(board_id);
    if !state.channel.leave(connection_id, &group).await {
        return false;
    }
    if state.channel.user_in_group(user.id, &group, connection_id).await {
        debug!(%connection_id, %board_id, "another tab still viewing");
        return true;
    }
    if state.presence.leave_board(board_id, user.id) {
        info!(%connection_id, %board_id, user_id = %user.id, "user left board");
        publish_presence(state, board_id).await;
        if let Ok(Some(board)) = state.store.get_board(board_id).await {
            note_visit(state, &board, user, ActivityKind::UserLeftBoard).await;
        }
    }
    true
}

/// Refresh a connection's liveness. When the user was showing as offline,
/// their boards get a fresh presence update.
pub async fn heartbeat(state: &AppState, connection_id: Uuid, user_id: Uuid) -> Option<UserPresence> {
    let now = now_ms();
    let was_online = state
        .presence
        .user_presence(user_id, now)
        .is_some_and(|p| p.status == PresenceStatus::Online);
    let presence = state.presence.heartbeat(connection_id, now)?;
    if !was_online {
        for board_id in state.presence.boards_for_user(user_id) {
            publish_presence(state, board_id).await;
        }
    }
    Some(presence)
}

/// Relay a drag preview to the other sockets on the board.
///
/// # Errors
///
/// `Invalid` when the socket has not joined the board.
pub async fn move_intent(
    state: &AppState,
    connection_id: Uuid,
    user: &User,
    intent: &MoveIntent,
) -> Result<usize, BoardError> {
    let group = Group::Board(intent.board_id);
    if !state.presence.is_viewing(intent.board_id, user.id) {
        return Err(BoardError::Invalid("join the board before sending move intents".into()));
    }
    let frame = Frame::event(events::TASK_MOVE_INTENT, intent)
        .with_board_id(intent.board_id)
        .with_from(user.id.to_string());
    Ok(state.channel.publish_except(&group, &frame, connection_id).await)
}

async fn note_visit(state: &AppState, board: &Board, user: &User, kind: ActivityKind) {
    let details = json!({ "board_title": board.title });
    if let Err(e) = activity::record(state, board.id, user.summary(), kind, details).await {
        warn!(board_id = %board.id, user_id = %user.id, error = %e, "visit activity not recorded");
    }
}

// =============================================================================
// PROFILE
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub avatar_url: Option<Option<String>>,
}

fn nullable<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

/// Update the caller's profile and push the new name/avatar to every board
/// they are viewing.
///
/// # Errors
///
/// `Invalid` for an empty name; store failures propagate.
pub async fn update_profile(state: &AppState, user: &User, patch: ProfilePatch) -> Result<User, BoardError> {
    let mut updated = user.clone();
    if let Some(name) = patch.name {
        let name = name.trim();
        if name.is_empty() {
            return Err(BoardError::Invalid("name is required".into()));
        }
        updated.name = name.to_string();
    }
    if let Some(avatar_url) = patch.avatar_url {
        updated.avatar_url = avatar_url;
    }
    state.store.upsert_user(&updated).await?;

    let changed = state.presence.refresh_profile(&identity_of(&updated));
    for board_id in &changed {
        publish_presence(state, *board_id).await;
    }
    info!(user_id = %updated.id, boards = changed.len(), "profile updated");
    Ok(updated)
}

// =============================================================================
// REAPER
// =============================================================================

/// Remove every connection whose heartbeat is older than the presence
/// timeout. Returns how many were removed.
pub async fn reap_expired(state: &AppState, now: i64) -> usize {
    let reaped = state.presence.reap_expired(now);
    let count = reaped.len();
    for gone in reaped {
        info!(
            connection_id = %gone.connection_id,
            user_id = %gone.user_id,
            connected_for_ms = gone.connected_for_ms,
            "reaped silent connection"
        );
        // Dropping the queue ends the socket's select loop.
        let groups = state.channel.disconnect(gone.connection_id).await;
        let vacated = vacate(state, gone.connection_id, gone.user_id, &groups, gone.vacated_boards).await;
        for board_id in vacated {
            publish_presence(state, board_id).await;
        }
    }
    count
}

/// Run [`reap_expired`] every heartbeat interval.
pub fn spawn_reaper(state: AppState) -> JoinHandle<()> {
    let interval_ms = state.presence.config().heartbeat_interval_ms();
    info!(interval_ms, "presence reaper configured");
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let removed = reap_expired(&state, now_ms()).await;
            if removed > 0 {
                debug!(removed, live = state.presence.connection_count(), "reaper pass");
            }
        }
    })
}

#[cfg(test)]
#[path = "connection_test.rs"]
mod tests;
