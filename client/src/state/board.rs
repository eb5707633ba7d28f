//! Board-session state for the joined board.
//!
//! SYSTEM CONTEXT
//! ==============
//! This model stores the local projection of one joined board: column
//! order, task cards, who else is looking, and the recent activity feed.
//! Server events are applied as "set placement to X", never as deltas, so
//! applying the same event twice leaves the view unchanged.

#[cfg(test)]
#[path = "board_test.rs"]
mod board_test;

use std::collections::{HashMap, VecDeque};

use frames::events::{
    ActivityRecord, BoardSnapshot, BoardSummary, ColumnCard, ColumnCreated, MoveIntent, TaskCard, TaskCreated,
    TaskMoved, TaskUpdated, UserPresence,
};
use uuid::Uuid;

use crate::error::ClientError;

/// Feed length kept in memory; matches the server's default page.
pub const DEFAULT_ACTIVITY_CAP: usize = 50;

/// Where a task sits: column and zero-based index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    pub column_id: Uuid,
    pub index: usize,
}

/// Another viewer's drag preview.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteIntent {
    /// Sender's user id, as stamped by the server.
    pub from: Option<String>,
    pub intent: MoveIntent,
}

/// Local projection of one board.
#[derive(Clone, Debug)]
pub struct BoardView {
    pub board_id: Uuid,
    pub title: String,
    pub description: String,
    pub is_public: bool,
    pub public_id: Option<String>,
    /// `None` on public views, where ownership is redacted.
    pub owner_id: Option<Uuid>,
    pub members: Vec<Uuid>,
    pub columns: Vec<ColumnCard>,
    /// Task cards keyed by id. Order lives in `columns`.
    pub tasks: HashMap<Uuid, TaskCard>,
    /// Current viewers, replaced wholesale by each presence update.
    pub viewers: Vec<UserPresence>,
    /// Newest first, at most `activity_cap` entries.
    pub activities: VecDeque<ActivityRecord>,
    /// Drag previews from other viewers keyed by task id.
    pub intents: HashMap<Uuid, RemoteIntent>,
    /// Set when the server reports the board deleted.
    pub deleted: bool,
    activity_cap: usize,
}

impl BoardView {
    #[must_use]
    pub fn from_snapshot(snapshot: BoardSnapshot, activity_cap: usize) -> Self {
        Self {
            board_id: snapshot.id,
            title: snapshot.title,
            description: snapshot.description,
            is_public: snapshot.is_public,
            public_id: snapshot.public_id,
            owner_id: snapshot.owner_id,
            members: snapshot.members,
            columns: snapshot.columns,
            tasks: snapshot.tasks.into_iter().map(|t| (t.id, t)).collect(),
            viewers: Vec::new(),
            activities: VecDeque::new(),
            intents: HashMap::new(),
            deleted: false,
            activity_cap: activity_cap.max(1),
        }
    }

    // =========================================================================
    // READS
    // =========================================================================

    #[must_use]
    pub fn column(&self, column_id: Uuid) -> Option<&ColumnCard> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    /// Task ids in a column, in display order.
    #[must_use]
    pub fn task_order(&self, column_id: Uuid) -> Option<&[Uuid]> {
        self.column(column_id).map(|c| c.task_ids.as_slice())
    }

    #[must_use]
    pub fn locate(&self, task_id: Uuid) -> Option<Placement> {
        self.columns.iter().find_map(|c| {
            c.task_ids
                .iter()
                .position(|id| *id == task_id)
                .map(|index| Placement { column_id: c.id, index })
        })
    }

    // =========================================================================
    // PLACEMENT
    // =========================================================================

    /// Put a task at `index` of `column_id`, removing it from wherever it
    /// was. The index is clamped to the column length after removal.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownColumn`] when the column is not on the board.
    pub fn place(&mut self, task_id: Uuid, column_id: Uuid, index: usize) -> Result<Placement, ClientError> {
        if self.column(column_id).is_none() {
            return Err(ClientError::UnknownColumn(column_id));
        }
        self.detach(task_id);
        let Some(column) = self.columns.iter_mut().find(|c| c.id == column_id) else {
            return Err(ClientError::UnknownColumn(column_id));
        };
        let index = index.min(column.task_ids.len());
        column.task_ids.insert(index, task_id);
        Ok(Placement { column_id, index })
    }

    /// Apply an authoritative move. Only the destination matters: the task is
    /// taken from wherever the view has it.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownTask`] when the view has no card for the task
    /// (a move that raced its delete); [`ClientError::UnknownColumn`] when the
    /// destination is not on the board. The view is untouched either way.
    pub fn apply_moved(&mut self, moved: &TaskMoved) -> Result<Placement, ClientError> {
        if !self.tasks.contains_key(&moved.task_id) {
            return Err(ClientError::UnknownTask(moved.task_id));
        }
        self.intents.remove(&moved.task_id);
        self.place(moved.task_id, moved.destination_column_id, moved.destination_index)
    }

    /// # Errors
    ///
    /// [`ClientError::UnknownColumn`] when the column is not on the board.
    pub fn apply_created(&mut self, created: &TaskCreated) -> Result<Placement, ClientError> {
        let placement = self.place(created.task.id, created.column_id, created.position)?;
        self.tasks.insert(created.task.id, created.task.clone());
        Ok(placement)
    }

    /// Replace the card and snap it to the placement the server reports.
    ///
    /// # Errors
    ///
    /// [`ClientError::UnknownColumn`] when the column is not on the board.
    pub fn apply_updated(&mut self, updated: &TaskUpdated) -> Result<Placement, ClientError> {
        let placement = self.place(updated.task.id, updated.column_id, updated.position)?;
        self.tasks.insert(updated.task.id, updated.task.clone());
        Ok(placement)
    }

    /// Drop a task from its column and the card map.
    pub fn remove_task(&mut self, task_id: Uuid) -> Option<Placement> {
        let placement = self.detach(task_id);
        self.tasks.remove(&task_id);
        self.intents.remove(&task_id);
        placement
    }

    fn detach(&mut self, task_id: Uuid) -> Option<Placement> {
        let placement = self.locate(task_id)?;
        if let Some(column) = self.columns.iter_mut().find(|c| c.id == placement.column_id) {
            column.task_ids.remove(placement.index);
        }
        Some(placement)
    }

    // =========================================================================
    // COLUMNS + BOARD
    // =========================================================================

    pub fn apply_column_created(&mut self, created: &ColumnCreated) {
        self.columns.retain(|c| c.id != created.column.id);
        let index = created.position.min(self.columns.len());
        self.columns.insert(index, created.column.clone());
    }

    pub fn rename_column(&mut self, column_id: Uuid, title: &str) -> bool {
        let Some(column) = self.columns.iter_mut().find(|c| c.id == column_id) else {
            return false;
        };
        title.clone_into(&mut column.title);
        true
    }

    /// Remove a column together with its tasks.
    pub fn remove_column(&mut self, column_id: Uuid) -> Option<ColumnCard> {
        let index = self.columns.iter().position(|c| c.id == column_id)?;
        let column = self.columns.remove(index);
        for task_id in &column.task_ids {
            self.tasks.remove(task_id);
            self.intents.remove(task_id);
        }
        Some(column)
    }

    pub fn apply_summary(&mut self, summary: &BoardSummary) {
        self.title.clone_from(&summary.title);
        self.description.clone_from(&summary.description);
        self.is_public = summary.is_public;
        if !summary.is_public {
            self.public_id = None;
        }
    }

    pub fn add_member(&mut self, user_id: Uuid) {
        if !self.members.contains(&user_id) {
            self.members.push(user_id);
        }
    }

    pub fn remove_member(&mut self, user_id: Uuid) {
        self.members.retain(|id| *id != user_id);
    }

    // =========================================================================
    // PRESENCE + FEED
    // =========================================================================

    pub fn set_viewers(&mut self, users: Vec<UserPresence>) {
        self.viewers = users;
    }

    /// Add a record to the front of the feed. Duplicates (same id) are
    /// ignored, so a replayed event does not double up.
    pub fn push_activity(&mut self, record: ActivityRecord) -> bool {
        if self.activities.iter().any(|a| a.id == record.id) {
            return false;
        }
        self.activities.push_front(record);
        self.activities.truncate(self.activity_cap);
        true
    }

    pub fn record_intent(&mut self, from: Option<String>, intent: MoveIntent) {
        self.intents.insert(intent.task_id, RemoteIntent { from, intent });
    }
}
