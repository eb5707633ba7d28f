//! Postgres-backed [`BoardStore`].
//!
//! DESIGN
//! ======
//! The board document keeps `members` and `columns` as JSONB so a column's
//! task order is one value. Ordering edits run inside a transaction that
//! locks the board row (`SELECT ... FOR UPDATE`), applies the shared
//! [`Board`] rules in memory, and writes the document back. Concurrent
//! edits to one board therefore serialize; the later one sees the earlier
//! one's result.

use frames::events::{ActivityRecord, ActorSummary, Priority, TaskSuggestion};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{AppliedMove, Board, BoardEdit, BoardStore, Column, Comment, StoreError, Task, User};

const BOARD_COLUMNS: &str =
    "id, title, description, owner_id, members, is_public, public_id, columns, created_at, updated_at";

const TASK_COLUMNS: &str =
    "id, board_id, title, description, priority, due_date, assignee_id, suggestion, created_by, created_at, updated_at";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_board(tx: &mut Transaction<'_, Postgres>, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1 FOR UPDATE"))
            .bind(board_id)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| board_from_row(&r)).transpose()
    }

    async fn write_board(tx: &mut Transaction<'_, Postgres>, board: &Board) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE boards
             SET title = $2, description = $3, members = $4, is_public = $5, public_id = $6,
                 columns = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(board.id)
        .bind(&board.title)
        .bind(&board.description)
        .bind(Json(&board.members))
        .bind(board.is_public)
        .bind(&board.public_id)
        .bind(Json(&board.columns))
        .bind(board.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

// =============================================================================
// ROW DECODING
// =============================================================================

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    Ok(User {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        avatar_url: row.try_get("avatar_url")?,
    })
}

fn board_from_row(row: &PgRow) -> Result<Board, StoreError> {
    let members: Json<Vec<Uuid>> = row.try_get("members")?;
    let columns: Json<Vec<Column>> = row.try_get("columns")?;
    Ok(Board {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        owner_id: row.try_get("owner_id")?,
        members: members.0,
        is_public: row.try_get("is_public")?,
        public_id: row.try_get("public_id")?,
        columns: columns.0,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn priority_from_text(raw: Option<String>) -> Result<Option<Priority>, StoreError> {
    raw.map(|s| serde_json::from_value(serde_json::Value::String(s)))
        .transpose()
        .map_err(StoreError::from)
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let suggestion: Option<Json<TaskSuggestion>> = row.try_get("suggestion")?;
    Ok(Task {
        id: row.try_get("id")?,
        board_id: row.try_get("board_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        priority: priority_from_text(row.try_get("priority")?)?,
        due_date: row.try_get("due_date")?,
        assignee_id: row.try_get("assignee_id")?,
        suggestion: suggestion.map(|s| s.0),
        created_by: row.try_get("created_by")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn comment_from_row(row: &PgRow) -> Result<Comment, StoreError> {
    Ok(Comment {
        id: row.try_get("id")?,
        board_id: row.try_get("board_id")?,
        task_id: row.try_get("task_id")?,
        author_id: row.try_get("author_id")?,
        body: row.try_get("body")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn activity_from_row(row: &PgRow) -> Result<ActivityRecord, StoreError> {
    let actor: Json<ActorSummary> = row.try_get("actor")?;
    let kind: String = row.try_get("kind")?;
    let details: Json<serde_json::Value> = row.try_get("details")?;
    Ok(ActivityRecord {
        id: row.try_get("id")?,
        board_id: row.try_get("board_id")?,
        actor: actor.0,
        kind: serde_json::from_value(serde_json::Value::String(kind))?,
        details: details.0,
        created_at: row.try_get("created_at")?,
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// =============================================================================
// STORE
// =============================================================================

#[async_trait::async_trait]
impl BoardStore for PgStore {
    async fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, name, email, avatar_url) VALUES ($1, $2, $3, $4)
             ON CONFLICT (id) DO UPDATE
             SET name = EXCLUDED.name, email = EXCLUDED.email, avatar_url = EXCLUDED.avatar_url",
        )
        .bind(user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&user.avatar_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_user(&self, user_id: Uuid) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name, email, avatar_url FROM users WHERE id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row = sqlx::query("SELECT id, name, email, avatar_url FROM users WHERE lower(email) = lower($1)")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn create_session(&self, token: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO sessions (token, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn session_user(&self, token: &str, now: i64) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT u.id, u.name, u.email, u.avatar_url
             FROM sessions s
             JOIN users u ON u.id = s.user_id
             WHERE s.token = $1 AND s.expires_at > $2",
        )
        .bind(token)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| user_from_row(&r)).transpose()
    }

    async fn delete_session(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_ws_ticket(&self, ticket: &str, user_id: Uuid, expires_at: i64) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO ws_tickets (ticket, user_id, expires_at) VALUES ($1, $2, $3)")
            .bind(ticket)
            .bind(user_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn consume_ws_ticket(&self, ticket: &str, now: i64) -> Result<Option<Uuid>, StoreError> {
        // Expired tickets are deleted too; the row is gone either way.
        let row = sqlx::query("DELETE FROM ws_tickets WHERE ticket = $1 RETURNING user_id, expires_at")
            .bind(ticket)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };
        let expires_at: i64 = row.try_get("expires_at")?;
        if expires_at <= now {
            return Ok(None);
        }
        Ok(Some(row.try_get("user_id")?))
    }

    async fn insert_board(&self, board: &Board) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO boards ({BOARD_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(board.id)
        .bind(&board.title)
        .bind(&board.description)
        .bind(board.owner_id)
        .bind(Json(&board.members))
        .bind(board.is_public)
        .bind(&board.public_id)
        .bind(Json(&board.columns))
        .bind(board.created_at)
        .bind(board.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_board(&self, board_id: Uuid) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1"))
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| board_from_row(&r)).transpose()
    }

    async fn get_board_by_public_id(&self, public_id: &str) -> Result<Option<Board>, StoreError> {
        let row = sqlx::query(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE public_id = $1"))
            .bind(public_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| board_from_row(&r)).transpose()
    }

    async fn list_boards_for_user(&self, user_id: Uuid) -> Result<Vec<Board>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {BOARD_COLUMNS} FROM boards
             WHERE owner_id = $1 OR members @> to_jsonb(ARRAY[$1::text])
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(board_from_row).collect()
    }

    async fn modify_board(&self, board_id: Uuid, edit: BoardEdit) -> Result<Option<Board>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut board) = Self::lock_board(&mut tx, board_id).await? else {
            return Ok(None);
        };
        edit(&mut board)?;
        board.updated_at = frames::now_ms();
        Self::write_board(&mut tx, &board).await?;
        tx.commit().await?;
        Ok(Some(board))
    }

    async fn move_task(
        &self,
        board_id: Uuid,
        task_id: Uuid,
        source_column_id: Uuid,
        destination_column_id: Uuid,
        destination_index: usize,
    ) -> Result<Option<(Board, AppliedMove)>, StoreError> {
        let mut tx = self.pool.begin().await?;
        let Some(mut board) = Self::lock_board(&mut tx, board_id).await? else {
            return Ok(None);
        };
        let applied = board.apply_move(task_id, source_column_id, destination_column_id, destination_index)?;
        board.updated_at = frames::now_ms();
        Self::write_board(&mut tx, &board).await?;
        tx.commit().await?;
        Ok(Some((board, applied)))
    }

    async fn delete_board(&self, board_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM boards WHERE id = $1")
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)"
        ))
        .bind(task.id)
        .bind(task.board_id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.map(Priority::as_str))
        .bind(&task.due_date)
        .bind(task.assignee_id)
        .bind(task.suggestion.as_ref().map(Json))
        .bind(task.created_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, board_id: Uuid, task_id: Uuid) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1 AND board_id = $2"))
            .bind(task_id)
            .bind(board_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| task_from_row(&r)).transpose()
    }

    async fn list_tasks(&self, board_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE board_id = $1"))
            .bind(board_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks
             SET title = $2, description = $3, priority = $4, due_date = $5, assignee_id = $6,
                 suggestion = $7, updated_at = $8
             WHERE id = $1",
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(task.priority.map(Priority::as_str))
        .bind(&task.due_date)
        .bind(task.assignee_id)
        .bind(task.suggestion.as_ref().map(Json))
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_task(&self, board_id: Uuid, task_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND board_id = $2")
            .bind(task_id)
            .bind(board_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO comments (id, board_id, task_id, author_id, body, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(comment.id)
        .bind(comment.board_id)
        .bind(comment.task_id)
        .bind(comment.author_id)
        .bind(&comment.body)
        .bind(comment.created_at)
        .bind(comment.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<Option<Comment>, StoreError> {
        let row = sqlx::query(
            "SELECT id, board_id, task_id, author_id, body, created_at, updated_at
             FROM comments WHERE id = $1 AND task_id = $2",
        )
        .bind(comment_id)
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| comment_from_row(&r)).transpose()
    }

    async fn list_comments(&self, task_id: Uuid) -> Result<Vec<Comment>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, board_id, task_id, author_id, body, created_at, updated_at
             FROM comments WHERE task_id = $1 ORDER BY created_at ASC",
        )
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(comment_from_row).collect()
    }

    async fn save_comment(&self, comment: &Comment) -> Result<(), StoreError> {
        sqlx::query("UPDATE comments SET body = $2, updated_at = $3 WHERE id = $1")
            .bind(comment.id)
            .bind(&comment.body)
            .bind(comment.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_comment(&self, task_id: Uuid, comment_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM comments WHERE id = $1 AND task_id = $2")
            .bind(comment_id)
            .bind(task_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn insert_activity(&self, record: &ActivityRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO activities (id, board_id, actor, kind, details, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(record.id)
        .bind(record.board_id)
        .bind(Json(&record.actor))
        .bind(record.kind.as_str())
        .bind(Json(&record.details))
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_activities(&self, board_id: Uuid, limit: usize) -> Result<Vec<ActivityRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, board_id, actor, kind, details, created_at
             FROM activities WHERE board_id = $1
             ORDER BY created_at DESC, seq DESC
             LIMIT $2",
        )
        .bind(board_id)
        .bind(to_i64(limit))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(activity_from_row).collect()
    }
}

#[cfg(all(test, feature = "live-db-tests"))]
#[path = "postgres_test.rs"]
mod tests;
