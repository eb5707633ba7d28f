//! Board sync driver: routes server frames into the view and the move
//! tracker.
//!
//! SYSTEM CONTEXT
//! ==============
//! The embedding app owns the websocket and HTTP client. It:
//! 1. sends [`BoardSync::join_request`] after `session:connected`
//! 2. feeds every inbound frame to [`BoardSync::handle_frame`]
//! 3. sends what [`BoardSync::drop_task`] returns and reports the outcome
//!    through [`BoardSync::complete_move`]
//! 4. shows [`BoardSync::take_errors`] to the user
//!
//! After a reconnect the app rejoins and the join reply rebuilds the view;
//! there is no replay of missed events.

#[cfg(test)]
#[path = "sync_test.rs"]
mod sync_test;

use frames::events::{self, BoardSnapshot, TaskMoved, UserPresence};
use frames::{Data, Frame};
use log::{debug, warn};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ClientError;
use crate::net::events::ServerEvent;
use crate::state::board::{BoardView, DEFAULT_ACTIVITY_CAP, Placement};
use crate::state::moves::{MoveSubmission, MoveTracker, Reconciliation};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug)]
pub struct BoardSync {
    pub status: ConnectionStatus,
    pub connection_id: Option<Uuid>,
    pub heartbeat_interval_ms: Option<u64>,
    view: Option<BoardView>,
    tracker: MoveTracker,
    /// Outstanding `board:join` request id.
    pending_join: Option<Uuid>,
    errors: Vec<String>,
    activity_cap: usize,
}

impl Default for BoardSync {
    fn default() -> Self {
        Self::new(DEFAULT_ACTIVITY_CAP)
    }
}

impl BoardSync {
    #[must_use]
    pub fn new(activity_cap: usize) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connection_id: None,
            heartbeat_interval_ms: None,
            view: None,
            tracker: MoveTracker::new(),
            pending_join: None,
            errors: Vec::new(),
            activity_cap,
        }
    }

    #[must_use]
    pub fn view(&self) -> Option<&BoardView> {
        self.view.as_ref()
    }

    #[must_use]
    pub fn tracker(&self) -> &MoveTracker {
        &self.tracker
    }

    /// Replace the view with a fresh snapshot. Pending moves are forgotten;
    /// the snapshot already reflects whatever the server accepted.
    pub fn reset(&mut self, snapshot: BoardSnapshot) {
        self.tracker.clear();
        self.view = Some(BoardView::from_snapshot(snapshot, self.activity_cap));
    }

    /// The transport dropped. Everything in the view may be stale.
    pub fn disconnected(&mut self) {
        self.status = ConnectionStatus::Disconnected;
        self.connection_id = None;
        self.pending_join = None;
    }

    /// User-facing errors collected since the last call.
    pub fn take_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.errors)
    }

    // =========================================================================
    // OUTBOUND
    // =========================================================================

    pub fn join_request(&mut self, board_id: Uuid) -> Frame {
        let frame = Frame::request(events::BOARD_JOIN, Data::new()).with_data("board_id", board_id.to_string());
        self.pending_join = Some(frame.id);
        frame
    }

    #[must_use]
    pub fn leave_request(board_id: Uuid) -> Frame {
        Frame::request(events::BOARD_LEAVE, Data::new()).with_data("board_id", board_id.to_string())
    }

    #[must_use]
    pub fn heartbeat_request() -> Frame {
        Frame::request(events::SESSION_HEARTBEAT, Data::new())
    }

    // =========================================================================
    // MOVES
    // =========================================================================

    /// # Errors
    ///
    /// `NoBoard` before a board is loaded; otherwise see
    /// [`MoveTracker::begin_drag`].
    pub fn begin_drag(&mut self, task_id: Uuid) -> Result<Placement, ClientError> {
        let view = self.view.as_ref().ok_or(ClientError::NoBoard)?;
        self.tracker.begin_drag(view, task_id)
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.tracker.cancel_drag()
    }

    /// # Errors
    ///
    /// `NoBoard` before a board is loaded; otherwise see
    /// [`MoveTracker::drop_on`].
    pub fn drop_task(&mut self, destination_column_id: Uuid, destination_index: usize) -> Result<MoveSubmission, ClientError> {
        let view = self.view.as_mut().ok_or(ClientError::NoBoard)?;
        self.tracker.drop_on(view, destination_column_id, destination_index)
    }

    /// Report how the move request for `task_id` ended.
    pub fn complete_move(&mut self, task_id: Uuid, result: Result<TaskMoved, ClientError>) -> Reconciliation {
        let Some(view) = self.view.as_mut() else {
            return Reconciliation::Untracked;
        };
        let outcome = self.tracker.complete(view, task_id, result);
        if let Reconciliation::RolledBack { error, .. } = &outcome {
            self.errors.push(format!("Could not move task: {error}"));
        }
        outcome
    }

    // =========================================================================
    // INBOUND
    // =========================================================================

    /// Apply one inbound frame. Returns the move reconciliation when the
    /// frame touched a task's placement.
    pub fn handle_frame(&mut self, frame: &Frame) -> Option<Reconciliation> {
        match ServerEvent::from_frame(frame) {
            Ok(event) => self.handle_event(event),
            Err(e) => {
                warn!("dropping frame: {e}");
                None
            }
        }
    }

    pub fn handle_event(&mut self, event: ServerEvent) -> Option<Reconciliation> {
        match event {
            ServerEvent::Connected { connection_id, heartbeat_interval_ms } => {
                self.status = ConnectionStatus::Connected;
                self.connection_id = connection_id;
                self.heartbeat_interval_ms = heartbeat_interval_ms;
                None
            }
            ServerEvent::Reply { parent_id, result } => {
                self.handle_reply(parent_id, result);
                None
            }
            ServerEvent::PublicRevoked { .. } => {
                if let Some(view) = self.view.as_mut() {
                    view.is_public = false;
                    view.public_id = None;
                }
                self.errors.push("This board is no longer shared.".to_owned());
                None
            }
            ServerEvent::Other(syscall) => {
                debug!("ignoring {syscall}");
                None
            }
            event => self.apply_board_event(event),
        }
    }

    fn handle_reply(&mut self, parent_id: Uuid, result: Result<Value, ClientError>) {
        if self.pending_join != Some(parent_id) {
            if let Err(e) = result {
                self.errors.push(e.to_string());
            }
            return;
        }
        self.pending_join = None;

        match result {
            Ok(data) => {
                match data.get("board").cloned().map(serde_json::from_value::<BoardSnapshot>) {
                    Some(Ok(snapshot)) => self.reset(snapshot),
                    Some(Err(e)) => warn!("join reply carried an unreadable board: {e}"),
                    None => {}
                }
                let users = data
                    .get("users")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<Vec<UserPresence>>(v).ok());
                if let (Some(view), Some(users)) = (self.view.as_mut(), users) {
                    view.set_viewers(users);
                }
            }
            Err(e) => self.errors.push(format!("Could not open board: {e}")),
        }
    }

    fn apply_board_event(&mut self, event: ServerEvent) -> Option<Reconciliation> {
        let view = self.view.as_mut()?;
        if event.board_id().is_some_and(|id| id != view.board_id) {
            debug!("event for another board ignored");
            return None;
        }

        match event {
            ServerEvent::TaskMoved(moved) => return Some(self.tracker.on_moved(view, &moved)),
            ServerEvent::TaskUpdated(updated) => return Some(self.tracker.on_updated(view, &updated)),
            ServerEvent::TaskCreated(created) => {
                if let Err(e) = view.apply_created(&created) {
                    warn!("task:created not applied: {e}");
                }
            }
            ServerEvent::TaskDeleted(deleted) => {
                self.tracker.on_deleted(deleted.task_id);
                view.remove_task(deleted.task_id);
            }
            ServerEvent::MoveIntent { from, intent } => view.record_intent(from, intent),
            ServerEvent::ColumnCreated(created) => view.apply_column_created(&created),
            ServerEvent::ColumnUpdated(updated) => {
                view.rename_column(updated.column_id, &updated.title);
            }
            ServerEvent::ColumnDeleted(deleted) => {
                if let Some(column) = view.remove_column(deleted.column_id) {
                    for task_id in column.task_ids {
                        self.tracker.on_deleted(task_id);
                    }
                }
            }
            ServerEvent::BoardUpdated(summary) => view.apply_summary(&summary),
            ServerEvent::BoardDeleted(_) => {
                view.deleted = true;
                self.tracker.clear();
                self.errors.push("This board was deleted.".to_owned());
            }
            ServerEvent::MemberAdded(changed) => view.add_member(changed.user.id),
            ServerEvent::MemberRemoved(changed) => view.remove_member(changed.user.id),
            ServerEvent::Presence(update) => view.set_viewers(update.users),
            ServerEvent::Activity(record) => {
                view.push_activity(record);
            }
            ServerEvent::CommentAdded(_) | ServerEvent::CommentUpdated(_) | ServerEvent::CommentDeleted(_) => {}
            ServerEvent::Connected { .. }
            | ServerEvent::Reply { .. }
            | ServerEvent::PublicRevoked { .. }
            | ServerEvent::Other(_) => {}
        }
        None
    }
}
