//! AI task suggestions: priority, deadline, and a one-line reason.
//!
//! DESIGN
//! ======
//! One chat-completion call per request. The model is asked for a small
//! JSON object; anything it returns that does not parse into a valid
//! suggestion falls back to a neutral default rather than failing the
//! request. Transport failures do fail the request and are retryable.
//!
//! The suggestion is stored on the task and announced like any other task
//! edit: `task_updated` activity, then `task:updated`.

use frames::ErrorCode;
use frames::events::{ActivityKind, Priority, TaskSuggestion};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use super::activity;
use super::board::{self, BoardError};
use crate::llm::LlmChat;
use crate::llm::types::{LlmError, Message};
use crate::state::AppState;
use crate::store::{StoreError, Task, User};

const MAX_TOKENS: u32 = 300;
const FALLBACK_REASON: &str = "Could not generate suggestions.";

const SYSTEM_PROMPT: &str = "You are an assistant that analyses kanban tasks. \
Reply with a single JSON object and nothing else.";

#[derive(Debug, thiserror::Error)]
pub enum SuggestError {
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("suggestion request failed: {0}")]
    Llm(#[from] LlmError),
    #[error("AI suggestions are not configured")]
    NotConfigured,
}

impl From<StoreError> for SuggestError {
    fn from(err: StoreError) -> Self {
        Self::Board(err.into())
    }
}

impl ErrorCode for SuggestError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Board(e) => e.error_code(),
            Self::Llm(_) => "E_SUGGESTION_FAILED",
            Self::NotConfigured => "E_LLM_NOT_CONFIGURED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Board(e) => e.retryable(),
            Self::Llm(e) => e.retryable(),
            Self::NotConfigured => false,
        }
    }
}

// =============================================================================
// PROMPT
// =============================================================================

fn today_dd_mm_yyyy() -> String {
    let date = time::OffsetDateTime::now_utc().date();
    format!("{:02}-{:02}-{}", date.day(), u8::from(date.month()), date.year())
}

pub(crate) fn build_prompt(task: &Task, today: &str) -> String {
    format!(
        "CURRENT_DATE: \"{today}\"\n\
         TASK TITLE: \"{title}\"\n\
         TASK DESCRIPTION: \"{description}\"\n\n\
         1. Suggest a priority, one of \"low\", \"medium\", \"high\".\n\
         2. Suggest a deadline as DD-MM-YYYY: high is 1-2 days from today, \
         medium 3-5 days, low 7-14 days.\n\
         3. Explain your reasoning in one sentence.\n\n\
         Answer with JSON only:\n\
         {{\"priority\": \"...\", \"deadline\": \"...\", \"reason\": \"...\"}}",
        title = task.title,
        description = task.description,
    )
}

// =============================================================================
// PARSING
// =============================================================================

#[derive(Deserialize)]
struct RawSuggestion {
    priority: String,
    #[serde(default)]
    deadline: Option<String>,
    #[serde(default)]
    reason: Option<String>,
}

#[must_use]
pub fn fallback_suggestion() -> TaskSuggestion {
    TaskSuggestion { priority: Priority::Medium, deadline: None, reason: FALLBACK_REASON.into() }
}

/// Pull the JSON object out of a model reply: a ```json fence when there is
/// one, otherwise the outermost braces.
fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let body = &text[start + "```json".len()..];
        let end = body.find("```")?;
        return Some(body[..end].trim());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn parse_priority(raw: &str) -> Option<Priority> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "low" => Some(Priority::Low),
        "medium" => Some(Priority::Medium),
        "high" => Some(Priority::High),
        _ => None,
    }
}

/// `DD-MM-YYYY` becomes `YYYY-MM-DD`; an ISO date passes through; anything
/// else is dropped.
fn normalize_deadline(raw: &str) -> Option<String> {
    let parts: Vec<&str> = raw.trim().split('-').collect();
    let [a, b, c] = parts.as_slice() else {
        return None;
    };
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|ch| ch.is_ascii_digit());
    if !(numeric(a) && numeric(b) && numeric(c)) {
        return None;
    }
    match (a.len(), b.len(), c.len()) {
        (2, 2, 4) => Some(format!("{c}-{b}-{a}")),
        (4, 2, 2) => Some(format!("{a}-{b}-{c}")),
        _ => None,
    }
}

/// Parse a model reply, falling back to the neutral default.
#[must_use]
pub fn parse_suggestion(text: &str) -> TaskSuggestion {
    let Some(raw) = extract_json(text).and_then(|json| serde_json::from_str::<RawSuggestion>(json).ok()) else {
        warn!(reply_len = text.len(), "suggestion reply was not JSON");
        return fallback_suggestion();
    };
    let Some(priority) = parse_priority(&raw.priority) else {
        warn!(priority = %raw.priority, "suggestion had unknown priority");
        return fallback_suggestion();
    };
    TaskSuggestion {
        priority,
        deadline: raw.deadline.as_deref().and_then(normalize_deadline),
        reason: raw
            .reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| FALLBACK_REASON.into()),
    }
}

// =============================================================================
// SERVICE
// =============================================================================

/// Ask the model for a suggestion and store it on the task.
///
/// # Errors
///
/// `NotConfigured` without an LLM client, `Llm` on transport failure, and
/// the usual board access and persistence errors.
pub async fn suggest_task(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    task_id: Uuid,
) -> Result<Task, SuggestError> {
    board::load_editable(state, actor, board_id).await?;
    let task = board::load_task(state, board_id, task_id).await?;
    let llm = state.llm.clone().ok_or(SuggestError::NotConfigured)?;

    let prompt = build_prompt(&task, &today_dd_mm_yyyy());
    let response = llm.chat(MAX_TOKENS, SYSTEM_PROMPT, &[Message::user(prompt)]).await?;
    info!(
        %board_id,
        %task_id,
        model = %response.model,
        input_tokens = response.input_tokens,
        output_tokens = response.output_tokens,
        "suggestion generated"
    );
    let suggestion = parse_suggestion(&response.text);
    Ok(store_suggestion(state, actor, board_id, task, suggestion).await?)
}

async fn store_suggestion(
    state: &AppState,
    actor: &User,
    board_id: Uuid,
    mut task: Task,
    suggestion: TaskSuggestion,
) -> Result<Task, BoardError> {
    let details = json!({
        "task_id": task.id,
        "title": task.title,
        "changes": ["suggestion"],
        "suggested_priority": suggestion.priority.as_str(),
    });
    task.suggestion = Some(suggestion);
    task.updated_at = frames::now_ms();
    state.store.save_task(&task).await?;

    activity::record(state, board_id, actor.summary(), ActivityKind::TaskUpdated, details).await?;
    let board = state
        .store
        .get_board(board_id)
        .await?
        .ok_or(BoardError::BoardNotFound(board_id))?;
    board::publish_task_updated(state, &board, &task).await?;
    Ok(task)
}

#[cfg(test)]
#[path = "suggest_test.rs"]
mod tests;
