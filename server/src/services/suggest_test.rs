use std::sync::{Arc, Mutex};

use super::*;
use crate::channel::Group;
use crate::llm::types::ChatResponse;
use crate::state::test_helpers::{seed_board, seed_task, seed_user, test_app_state, test_app_state_with_llm};
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

// =========================================================================
// MockLlm
// =========================================================================

struct MockLlm {
    responses: Mutex<Vec<Result<ChatResponse, LlmError>>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    fn new(responses: Vec<Result<ChatResponse, LlmError>>) -> Self {
        Self { responses: Mutex::new(responses), prompts: Mutex::new(Vec::new()) }
    }

    fn replying(text: &str) -> Self {
        Self::new(vec![Ok(reply(text))])
    }
}

fn reply(text: &str) -> ChatResponse {
    ChatResponse {
        text: text.into(),
        model: "mock".into(),
        stop_reason: "end_turn".into(),
        input_tokens: 10,
        output_tokens: 20,
    }
}

#[async_trait::async_trait]
impl LlmChat for MockLlm {
    async fn chat(&self, _max_tokens: u32, _system: &str, messages: &[Message]) -> Result<ChatResponse, LlmError> {
        self.prompts
            .lock()
            .unwrap()
            .extend(messages.iter().map(|m| m.content.clone()));
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() { Ok(reply("")) } else { responses.remove(0) }
    }
}

// =========================================================================
// parse_suggestion
// =========================================================================

#[test]
fn parses_fenced_json_and_converts_deadline() {
    let text = "Sure!\n```json\n{\"priority\": \"High\", \"deadline\": \"05-11-2026\", \"reason\": \"Blocks launch.\"}\n```";
    let s = parse_suggestion(text);
    assert_eq!(s.priority, Priority::High);
    assert_eq!(s.deadline.as_deref(), Some("2026-11-05"));
    assert_eq!(s.reason, "Blocks launch.");
}

#[test]
fn parses_bare_json_object() {
    let s = parse_suggestion("{\"priority\": \"low\", \"deadline\": \"2026-12-01\", \"reason\": \"Nice to have.\"}");
    assert_eq!(s.priority, Priority::Low);
    assert_eq!(s.deadline.as_deref(), Some("2026-12-01"));
}

#[test]
fn garbage_falls_back_to_medium() {
    assert_eq!(parse_suggestion("I cannot help with that."), fallback_suggestion());
    assert_eq!(parse_suggestion("{\"priority\": \"urgent\"}"), fallback_suggestion());
    let fallback = fallback_suggestion();
    assert_eq!(fallback.priority, Priority::Medium);
    assert!(fallback.deadline.is_none());
    assert_eq!(fallback.reason, "Could not generate suggestions.");
}

#[test]
fn bad_deadline_is_dropped_but_priority_kept() {
    let s = parse_suggestion("{\"priority\": \"medium\", \"deadline\": \"next week\", \"reason\": \"r\"}");
    assert_eq!(s.priority, Priority::Medium);
    assert!(s.deadline.is_none());
    assert_eq!(s.reason, "r");
}

#[test]
fn prompt_carries_task_and_date() {
    let task = Task {
        id: Uuid::new_v4(),
        board_id: Uuid::new_v4(),
        title: "Fix login".into(),
        description: "Users bounce".into(),
        priority: None,
        due_date: None,
        assignee_id: None,
        suggestion: None,
        created_by: Uuid::new_v4(),
        created_at: 0,
        updated_at: 0,
    };
    let prompt = build_prompt(&task, "19-10-2026");
    assert!(prompt.contains("CURRENT_DATE: \"19-10-2026\""));
    assert!(prompt.contains("Fix login"));
    assert!(prompt.contains("Users bounce"));
    assert!(prompt.contains("DD-MM-YYYY"));
}

// =========================================================================
// suggest_task
// =========================================================================

#[tokio::test]
async fn suggestion_is_stored_logged_and_broadcast() {
    let mock = Arc::new(MockLlm::replying(
        "```json\n{\"priority\": \"high\", \"deadline\": \"21-10-2026\", \"reason\": \"Customer facing.\"}\n```",
    ));
    let state = test_app_state_with_llm(mock.clone());
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let task = seed_task(&state, board.id, board.columns[1].id, "Fix login").await;

    let (tx, mut rx) = mpsc::channel(16);
    let watcher = Uuid::new_v4();
    state.channel.connect(watcher, None, tx).await;
    state.channel.join(watcher, Group::Board(board.id)).await;

    let updated = suggest_task(&state, &alice, board.id, task.id).await.expect("suggest");
    let suggestion = updated.suggestion.expect("stored");
    assert_eq!(suggestion.priority, Priority::High);
    assert_eq!(suggestion.deadline.as_deref(), Some("2026-10-21"));
    assert!(mock.prompts.lock().unwrap()[0].contains("Fix login"));

    let stored = state.store.get_task(board.id, task.id).await.expect("get").expect("exists");
    assert_eq!(stored.suggestion.map(|s| s.reason).as_deref(), Some("Customer facing."));

    let first = timeout(Duration::from_millis(200), rx.recv()).await.expect("timed out").expect("closed");
    assert_eq!(first.syscall, "activity:created");
    let second = timeout(Duration::from_millis(200), rx.recv()).await.expect("timed out").expect("closed");
    assert_eq!(second.syscall, "task:updated");
    assert_eq!(second.data["column_id"], serde_json::json!(board.columns[1].id));
    assert_eq!(second.data["task"]["suggestion"]["priority"], "high");
}

#[tokio::test]
async fn unparseable_reply_stores_fallback() {
    let state = test_app_state_with_llm(Arc::new(MockLlm::replying("no idea")));
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let task = seed_task(&state, board.id, board.columns[0].id, "t").await;

    let updated = suggest_task(&state, &alice, board.id, task.id).await.expect("suggest");
    assert_eq!(updated.suggestion, Some(fallback_suggestion()));
}

#[tokio::test]
async fn transport_failure_is_retryable_and_changes_nothing() {
    let state = test_app_state_with_llm(Arc::new(MockLlm::new(vec![Err(LlmError::ApiRequest("reset".into()))])));
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let task = seed_task(&state, board.id, board.columns[0].id, "t").await;

    let err = suggest_task(&state, &alice, board.id, task.id).await.expect_err("llm down");
    assert!(matches!(err, SuggestError::Llm(_)));
    assert!(err.retryable());
    let stored = state.store.get_task(board.id, task.id).await.expect("get").expect("exists");
    assert!(stored.suggestion.is_none());
    assert!(state.store.list_activities(board.id, 10).await.expect("list").is_empty());
}

#[tokio::test]
async fn missing_llm_is_reported() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let task = seed_task(&state, board.id, board.columns[0].id, "t").await;

    let err = suggest_task(&state, &alice, board.id, task.id).await.expect_err("no llm");
    assert!(matches!(err, SuggestError::NotConfigured));
    assert_eq!(err.error_code(), "E_LLM_NOT_CONFIGURED");
}

#[tokio::test]
async fn unknown_task_is_not_found_before_calling_llm() {
    let mock = Arc::new(MockLlm::replying("{}"));
    let state = test_app_state_with_llm(mock.clone());
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;

    let err = suggest_task(&state, &alice, board.id, Uuid::new_v4()).await.expect_err("missing");
    assert_eq!(err.error_code(), "E_NOT_FOUND");
    assert!(mock.prompts.lock().unwrap().is_empty());
}
