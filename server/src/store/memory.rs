//! In-memory [`BoardStore`] used by tests and database-less development runs.
//!
//! All state lives behind one `RwLock`, so every trait call is atomic with
//! respect to every other. Nothing survives a restart.

use std::collections::HashMap;

use frames::events::ActivityRecord;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AppliedMove, Board, BoardEdit, BoardStore, Comment, StoreError, Task, User};

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    sessions: HashMap<String, (Uuid, i64)>,
    tickets: HashMap<String, (Uuid, i64)>,
    boards: HashMap<Uuid, Board>,
    tasks: HashMap<Uuid, Task>,
    comments: HashMap<Uuid, Comment>,
    /// Append order doubles as the tiebreak for equal timestamps.
    activities: Vec<ActivityRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl BoardStore for MemoryStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.tables.write().await.users.insert(user.id, user.clone());
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.tables.read().await.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email.as_deref().is_some_and(|e| e.eq_ignore_ascii_case(email)))
            .cloned())
    }

    async fn create_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .sessions
            .insert(token.to_owned(), (user_id, expires_at));
        Ok(())
    }

    async fn session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError> {
        let tables = self.tables.read().await;
        let Some((user_id, expires_at)) = tables.sessions.get(token) else {
            return Ok(None);
        };
        if *expires_at <= now {
            return Ok(None);
        }
        Ok(tables.users.get(user_id).cloned())
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        self.tables.write().await.sessions.remove(token);
        Ok(())
    }

    async fn create_ws_ticket(&self, ticket: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .tickets
            .insert(ticket.to_owned(), (user_id, expires_at));
        Ok(())
    }

    async fn consume_ws_ticket(&self, ticket: &str, now: i64) -> Result<Option<Uuid>, StoreError> {
        let removed = self.tables.write().await.tickets.remove(ticket);
        Ok(removed.and_then(|(user_id, expires_at)| (expires_at > now).then_some(user_id)))
    }

    async fn insert_board(&self, board: &Board) -> Result<(), StoreError> {
        self.tables.write().await.boards.insert(board.id, board.clone());
        Ok(())
    }

    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        Ok(self.tables.read().await.boards.get(&board_id).cloned())
    }

    async fn get_board_by_public_id(&self, public_id: &str) -> Result<Option<Board>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .boards
            .values()
            .find(|b| b.public_id.as_deref() == Some(public_id))
            .cloned())
    }

    async fn list_boards_for_user(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError> {
        let tables = self.tables.read().await;
        let mut boards: Vec<Board> = tables
            .boards
            .values()
            .filter(|b| b.can_edit(user_id))
            .cloned()
            .collect();
        boards.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(boards)
    }

    async fn modify_board(&self, board_id: Uuid, edit: BoardEdit) -> Result<Option<Board>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.boards.get_mut(&board_id) else {
            return Ok(None);
        };
        let mut draft = stored.clone();
        edit(&mut draft)?;
        draft.updated_at = frames::now_ms();
        *stored = draft.clone();
        Ok(Some(draft))
    }

    async fn move_task(
        &self,
        board_id: Uuid,
        task_id: Uuid,
        source_column_id: Uuid,
        destination_column_id: Uuid,
        destination_index: usize,
    ) -> Result<Option<(Board, AppliedMove)>, StoreError> {
        let mut tables = self.tables.write().await;
        let Some(stored) = tables.boards.get_mut(&board_id) else {
            return Ok(None);
        };
        let applied = stored.apply_move(task_id, source_column_id, destination_column_id, destination_index)?;
        stored.updated_at = frames::now_ms();
        Ok(Some((stored.clone(), applied)))
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.boards.remove(&board_id).is_none() {
            return Ok(false);
        }
        tables.tasks.retain(|_, t| t.board_id != board_id);
        tables.comments.retain(|_, c| c.board_id != board_id);
        tables.activities.retain(|a| a.board_id != board_id);
        Ok(true)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tables.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get_task(&self, board_id: Uuid, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .get(&task_id)
            .filter(|t| t.board_id == board_id)
            .cloned())
    }

    async fn list_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.board_id == board_id)
            .cloned()
            .collect())
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.tables.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn delete_task(&self, board_id: Uuid, task_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let owned = tables.tasks.get(&task_id).is_some_and(|t| t.board_id == board_id);
        if !owned {
            return Ok(false);
        }
        tables.tasks.remove(&task_id);
        tables.comments.retain(|_, c| c.task_id != task_id);
        Ok(true)
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .comments
            .insert(comment.id, comment.clone());
        Ok(())
    }

    async fn get_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<Option<Comment>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .comments
            .get(&comment_id)
            .filter(|c| c.task_id == task_id)
            .cloned())
    }

    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        let tables = self.tables.read().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .values()
            .filter(|c| c.task_id == task_id)
            .cloned()
            .collect();
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .comments
            .insert(comment.id, comment.clone());
        Ok(())
    }

    async fn delete_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        let owned = tables.comments.get(&comment_id).is_some_and(|c| c.task_id == task_id);
        if owned {
            tables.comments.remove(&comment_id);
        }
        Ok(owned)
    }

    async fn insert_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        self.tables.write().await.activities.push(record.clone());
        Ok(())
    }

    async fn list_activities(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        let tables = self.tables.read().await;
        let mut rows: Vec<(usize, &ActivityRecord)> = tables
            .activities
            .iter()
            .enumerate()
            .filter(|(_, a)| a.board_id == board_id)
            .collect();
        rows.sort_by(|(ia, a), (ib, b)| b.created_at.cmp(&a.created_at).then(ib.cmp(ia)));
        Ok(rows
            .into_iter()
            .take(limit)
            .map(|(_, a)| a.clone())
            .collect())
    }
}

#[cfg(test)]
#[path = "memory_test.rs"]
mod tests;
