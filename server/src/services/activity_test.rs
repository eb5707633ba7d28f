use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::*;
use crate::state::test_helpers::{FailingStore, seed_user, test_app_state, test_app_state_with_store};
use crate::store::BoardStore;
use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};

async fn watch_board(state: &AppState, board_id: Uuid) -> mpsc::Receiver<Frame> {
    let (tx, rx) = mpsc::channel(64);
    let conn = Uuid::new_v4();
    state.channel.connect(conn, None, tx).await;
    state.channel.join(conn, Group::Board(board_id)).await;
    rx
}

#[tokio::test]
async fn record_persists_then_publishes() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board_id = Uuid::new_v4();
    let mut rx = watch_board(&state, board_id).await;

    let record = record(&state, board_id, alice.summary(), ActivityKind::TaskCreated, serde_json::json!({"title": "t"}))
        .await
        .expect("record");

    let frame = timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("timed out")
        .expect("closed");
    assert_eq!(frame.syscall, "activity:created");
    assert_eq!(frame.board_id, Some(board_id));
    let published: ActivityRecord = frame.decode().expect("decode");
    assert_eq!(published, record);

    let stored = feed(&state, board_id, None).await.expect("feed");
    assert_eq!(stored, vec![record]);
}

#[tokio::test]
async fn failed_write_publishes_nothing() {
    let store = Arc::new(FailingStore::default());
    store.fail_activity.store(true, Ordering::SeqCst);
    let state = test_app_state_with_store(store.clone());
    let alice = seed_user(&state, "alice").await;
    let board_id = Uuid::new_v4();
    let mut rx = watch_board(&state, board_id).await;

    let err = record(&state, board_id, alice.summary(), ActivityKind::TaskMoved, Value::Null)
        .await
        .expect_err("write should fail");
    assert_eq!(err.error_code(), "E_ACTIVITY_NOT_RECORDED");
    assert!(err.retryable());
    assert!(timeout(Duration::from_millis(80), rx.recv()).await.is_err());
    assert!(store.inner.list_activities(board_id, 50).await.expect("list").is_empty());
}

#[tokio::test]
async fn feed_returns_fifty_newest_of_fifty_one() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board_id = Uuid::new_v4();
    let mut ids = Vec::new();
    for i in 0..51 {
        let rec = record(&state, board_id, alice.summary(), ActivityKind::TaskCreated, serde_json::json!({ "n": i }))
            .await
            .expect("record");
        ids.push(rec.id);
    }

    let rows = feed(&state, board_id, None).await.expect("feed");
    assert_eq!(rows.len(), 50);
    assert_eq!(rows[0].details["n"], 50);
    assert_eq!(rows[49].details["n"], 1);
    assert!(!rows.iter().any(|r| r.id == ids[0]));
}

#[tokio::test]
async fn feed_limit_is_clamped() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board_id = Uuid::new_v4();
    for _ in 0..3 {
        record(&state, board_id, alice.summary(), ActivityKind::TaskUpdated, Value::Null)
            .await
            .expect("record");
    }
    assert_eq!(feed(&state, board_id, Some(0)).await.expect("feed").len(), 1);
    assert_eq!(feed(&state, board_id, Some(2)).await.expect("feed").len(), 2);
    assert_eq!(feed(&state, board_id, Some(10_000)).await.expect("feed").len(), 3);
}
