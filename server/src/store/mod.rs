//! Board document store.
//!
//! ARCHITECTURE
//! ============
//! Services talk to persistence only through the [`BoardStore`] trait.
//! `PgStore` backs production; `MemoryStore` backs tests and database-less
//! development runs. Both share the pure ordering rules on [`Board`], so a
//! move is validated and spliced identically regardless of backend.
//!
//! DESIGN
//! ======
//! A board is a document: title, members, share state, and an ordered list
//! of columns, each holding an ordered list of task ids. Tasks, comments,
//! and activity records are separate rows keyed by board. Ordering edits go
//! through [`BoardStore::modify_board`] / [`BoardStore::move_task`], which
//! apply their change atomically against the current stored document. Last
//! accepted write wins.

pub mod memory;
pub mod postgres;

use frames::events::{
    ActivityRecord, ActorSummary, BoardSnapshot, ColumnCard, Priority, TaskCard, TaskSuggestion,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// ERRORS
// =============================================================================

/// A document edit that violates the board's ordering rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("column not found: {0}")]
    ColumnNotFound(Uuid),
    #[error("task {task_id} is not in column {column_id}")]
    TaskNotInColumn { task_id: Uuid, column_id: Uuid },
    #[error("index {index} out of range (max {max})")]
    IndexOutOfRange { index: usize, max: usize },
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("edit rejected: {0}")]
    Rejected(#[from] EditError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored document is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl frames::ErrorCode for StoreError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Rejected(_) => "E_REJECTED",
            Self::Database(_) => "E_DATABASE",
            Self::Malformed(_) => "E_MALFORMED",
            Self::Unavailable(_) => "E_STORE_UNAVAILABLE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Unavailable(_))
    }
}

// =============================================================================
// MODELS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
}

impl User {
    #[must_use]
    pub fn summary(&self) -> ActorSummary {
        ActorSummary { id: self.id, name: self.name.clone(), avatar_url: self.avatar_url.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub id: Uuid,
    pub title: String,
    pub task_ids: Vec<Uuid>,
}

impl Column {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self { id: Uuid::new_v4(), title: title.into(), task_ids: Vec::new() }
    }

    #[must_use]
    pub fn card(&self) -> ColumnCard {
        ColumnCard { id: self.id, title: self.title.clone(), task_ids: self.task_ids.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub owner_id: Uuid,
    pub members: Vec<Uuid>,
    pub is_public: bool,
    pub public_id: Option<String>,
    pub columns: Vec<Column>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub board_id: Uuid,
    pub title: String,
    pub description: String,
    pub priority: Option<Priority>,
    pub due_date: Option<String>,
    pub assignee_id: Option<Uuid>,
    pub suggestion: Option<TaskSuggestion>,
    pub created_by: Uuid,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    #[must_use]
    pub fn card(&self) -> TaskCard {
        TaskCard {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            priority: self.priority,
            due_date: self.due_date.clone(),
            assignee_id: self.assignee_id,
            suggestion: self.suggestion.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: Uuid,
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub author_id: Uuid,
    pub body: String,
    pub created_at: i64,
    pub updated_at: i64,
}

// =============================================================================
// BOARD RULES
// =============================================================================

/// Column titles every new board starts with.
pub const DEFAULT_COLUMNS: [&str; 3] = ["To Do", "In Progress", "Done"];

/// Result of a validated move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedMove {
    /// Where the task actually was before the move.
    pub source_index: usize,
    pub destination_index: usize,
}

impl Board {
    /// Create a board owned by `owner_id` with the default columns.
    #[must_use]
    pub fn new(owner_id: Uuid, title: impl Into<String>, description: impl Into<String>, now: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            owner_id,
            members: Vec::new(),
            is_public: false,
            public_id: None,
            columns: DEFAULT_COLUMNS.iter().map(|t| Column::new(*t)).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn is_owner(&self, user_id: Uuid) -> bool {
        self.owner_id == user_id
    }

    /// Owner or member.
    #[must_use]
    pub fn can_edit(&self, user_id: Uuid) -> bool {
        self.is_owner(user_id) || self.members.contains(&user_id)
    }

    /// Owner, member, or anyone when the board is public.
    #[must_use]
    pub fn can_view(&self, user_id: Uuid) -> bool {
        self.is_public || self.can_edit(user_id)
    }

    #[must_use]
    pub fn column(&self, column_id: Uuid) -> Option<&Column> {
        self.columns.iter().find(|c| c.id == column_id)
    }

    fn column_index(&self, column_id: Uuid) -> Result<usize, EditError> {
        self.columns
            .iter()
            .position(|c| c.id == column_id)
            .ok_or(EditError::ColumnNotFound(column_id))
    }

    /// Current `(column_id, index)` of a task.
    #[must_use]
    pub fn locate_task(&self, task_id: Uuid) -> Option<(Uuid, usize)> {
        self.columns.iter().find_map(|column| {
            column
                .task_ids
                .iter()
                .position(|id| *id == task_id)
                .map(|index| (column.id, index))
        })
    }

    /// Insert a task id into a column. `position` defaults to the end.
    ///
    /// # Errors
    ///
    /// Fails when the column is unknown or `position` exceeds its length.
    pub fn insert_task(&mut self, column_id: Uuid, task_id: Uuid, position: Option<usize>) -> Result<usize, EditError> {
        let col = self.column_index(column_id)?;
        let ids = &mut self.columns[col].task_ids;
        let index = position.unwrap_or(ids.len());
        if index > ids.len() {
            return Err(EditError::IndexOutOfRange { index, max: ids.len() });
        }
        ids.insert(index, task_id);
        Ok(index)
    }

    /// Remove a task id from whichever column holds it.
    pub fn remove_task(&mut self, task_id: Uuid) -> Option<(Uuid, usize)> {
        let (column_id, index) = self.locate_task(task_id)?;
        if let Some(column) = self.columns.iter_mut().find(|c| c.id == column_id) {
            column.task_ids.remove(index);
        }
        Some((column_id, index))
    }

    /// Move a task between (or within) columns.
    ///
    /// The task must currently sit in `source_column_id`. `destination_index`
    /// is interpreted against the destination list after the task has been
    /// removed, so it may be at most that list's length. Nothing changes
    /// unless every check passes.
    ///
    /// # Errors
    ///
    /// Returns an [`EditError`] describing the first failed check.
    pub fn apply_move(
        &mut self,
        task_id: Uuid,
        source_column_id: Uuid,
        destination_column_id: Uuid,
        destination_index: usize,
    ) -> Result<AppliedMove, EditError> {
        let src = self.column_index(source_column_id)?;
        let dst = self.column_index(destination_column_id)?;

        let Some(source_index) = self.columns[src].task_ids.iter().position(|id| *id == task_id) else {
            return Err(EditError::TaskNotInColumn { task_id, column_id: source_column_id });
        };

        let dest_len_after_removal = if src == dst {
            self.columns[dst].task_ids.len() - 1
        } else {
            self.columns[dst].task_ids.len()
        };
        if destination_index > dest_len_after_removal {
            return Err(EditError::IndexOutOfRange { index: destination_index, max: dest_len_after_removal });
        }

        self.columns[src].task_ids.remove(source_index);
        self.columns[dst].task_ids.insert(destination_index, task_id);
        Ok(AppliedMove { source_index, destination_index })
    }

    /// Build the full client snapshot. Tasks not referenced by any column
    /// are left out.
    #[must_use]
    pub fn snapshot(&self, tasks: &[Task]) -> BoardSnapshot {
        let placed: Vec<TaskCard> = self
            .columns
            .iter()
            .flat_map(|c| c.task_ids.iter())
            .filter_map(|id| tasks.iter().find(|t| t.id == *id))
            .map(Task::card)
            .collect();
        BoardSnapshot {
            id: self.id,
            title: self.title.clone(),
            description: self.description.clone(),
            owner_id: Some(self.owner_id),
            members: self.members.clone(),
            is_public: self.is_public,
            public_id: self.public_id.clone(),
            columns: self.columns.iter().map(Column::card).collect(),
            tasks: placed,
            updated_at: self.updated_at,
        }
    }
}

// =============================================================================
// STORE TRAIT
// =============================================================================

/// An atomic edit applied to the current stored board document.
pub type BoardEdit = Box<dyn FnOnce(&mut Board) -> Result<(), EditError> + Send>;

/// Persistence seam for boards and everything hanging off them.
///
/// `Ok(None)` / `Ok(false)` mean "no such row"; `Err` is reserved for
/// rejected edits and backend failures.
#[async_trait::async_trait]
pub trait BoardStore: Send + Sync {
    // --- users + sessions ---

    async fn upsert_user(&self, user: &User) -> Result<(), StoreError>;
    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    async fn create_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError>;
    async fn session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError>;
    async fn delete_session(&self, token: &str) -> Result<(), StoreError>;

    async fn create_ws_ticket(&self, ticket: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError>;
    /// Delete the ticket and return its user if it was still valid.
    async fn consume_ws_ticket(&self, ticket: &str, now: i64) -> Result<Option<Uuid>, StoreError>;

    // --- boards ---

    async fn insert_board(&self, board: &Board) -> Result<(), StoreError>;
    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError>;
    async fn get_board_by_public_id(&self, public_id: &str) -> Result<Option<Board>, StoreError>;
    /// Boards the user owns or is a member of, newest first.
    async fn list_boards_for_user(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError>;
    /// Apply `edit` to the stored document and return the saved result.
    async fn modify_board(&self, board_id: Uuid, edit: BoardEdit) -> Result<Option<Board>, StoreError>;
    /// Validate and apply a move atomically; see [`Board::apply_move`].
    async fn move_task(
        &self,
        board_id: Uuid,
        task_id: Uuid,
        source_column_id: Uuid,
        destination_column_id: Uuid,
        destination_index: usize,
    ) -> Result<Option<(Board, AppliedMove)>, StoreError>;
    /// Delete a board and all of its tasks, comments, and activity.
    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError>;

    // --- tasks ---

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn get_task(&self, board_id: Uuid, task_id: Uuid) -> Result<Option<Task>, StoreError>;
    async fn list_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError>;
    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn delete_task(&self, board_id: Uuid, task_id: Uuid) -> Result<bool, StoreError>;

    // --- comments ---

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError>;
    async fn get_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<Option<Comment>, StoreError>;
    /// Comments on a task, oldest first.
    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<Comment>, StoreError>;
    async fn save_comment(&self, comment: &Comment) -> Result<(), StoreError>;
    async fn delete_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<bool, StoreError>;

    // --- activity ---

    async fn insert_activity(&self, record: &ActivityRecord) -> Result<(), StoreError>;
    /// Newest first, at most `limit` rows.
    async fn list_activities(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
