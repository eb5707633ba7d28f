use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::*;
use crate::services::board::{MemberRef, add_member, set_sharing};
use crate::state::test_helpers::{FailingStore, seed_board, seed_user, test_app_state, test_app_state_with_store};
use tokio::time::timeout;

struct Tab {
    id: Uuid,
    rx: mpsc::Receiver<Frame>,
}

async fn open_tab(state: &AppState, user: &User) -> Tab {
    let (tx, rx) = mpsc::channel(64);
    let id = Uuid::new_v4();
    connect(state, id, Some(user), tx).await.expect("registered");
    Tab { id, rx }
}

async fn assert_channel_has_frame(rx: &mut mpsc::Receiver<Frame>) -> Frame {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("frame receive timed out")
        .expect("channel closed")
}

async fn assert_channel_empty(rx: &mut mpsc::Receiver<Frame>) {
    assert!(
        timeout(Duration::from_millis(80), rx.recv()).await.is_err(),
        "expected channel to remain empty"
    );
}

/// Skip frames until one with `syscall` arrives.
async fn next_with(rx: &mut mpsc::Receiver<Frame>, syscall: &str) -> Frame {
    loop {
        let frame = assert_channel_has_frame(rx).await;
        if frame.syscall == syscall {
            return frame;
        }
    }
}

fn viewer_ids(frame: &Frame) -> Vec<Uuid> {
    let update: PresenceUpdate = frame.decode().expect("presence payload");
    update.users.into_iter().map(|u| u.user_id).collect()
}

async fn drain(rx: &mut mpsc::Receiver<Frame>) {
    while timeout(Duration::from_millis(30), rx.recv()).await.is_ok_and(|f| f.is_some()) {}
}

// =============================================================================
// join / leave
// =============================================================================

#[tokio::test]
async fn join_publishes_presence_then_activity() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let mut tab = open_tab(&state, &alice).await;

    let viewers = join(&state, tab.id, &alice, board.id).await.expect("join");
    assert_eq!(viewers.len(), 1);

    let presence = assert_channel_has_frame(&mut tab.rx).await;
    assert_eq!(presence.syscall, "presence:update");
    assert_eq!(viewer_ids(&presence), vec![alice.id]);
    let activity = assert_channel_has_frame(&mut tab.rx).await;
    assert_eq!(activity.syscall, "activity:created");
    assert_eq!(activity.data["kind"], "user_joined_board");
}

#[tokio::test]
async fn join_hidden_board_is_not_found_and_has_no_side_effects() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let mallory = seed_user(&state, "mallory").await;
    let board = seed_board(&state, &alice).await;
    let mut tab = open_tab(&state, &mallory).await;

    let err = join(&state, tab.id, &mallory, board.id).await.expect_err("hidden");
    assert!(matches!(err, BoardError::BoardNotFound(_)));
    assert!(!state.presence.is_viewing(board.id, mallory.id));
    assert_eq!(state.channel.group_size(&Group::Board(board.id)).await, 0);
    assert_channel_empty(&mut tab.rx).await;
}

#[tokio::test]
async fn second_tab_join_logs_no_activity() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let tab1 = open_tab(&state, &alice).await;
    let tab2 = open_tab(&state, &alice).await;

    join(&state, tab1.id, &alice, board.id).await.expect("join");
    join(&state, tab2.id, &alice, board.id).await.expect("join");

    let rows = state.store.list_activities(board.id, 50).await.expect("list");
    assert_eq!(rows.len(), 1);
    assert_eq!(state.presence.board_viewers(board.id, now_ms()).len(), 1);
}

#[tokio::test]
async fn join_survives_activity_failure() {
    let store = Arc::new(FailingStore::default());
    let state = test_app_state_with_store(store.clone());
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let tab = open_tab(&state, &alice).await;

    store.fail_activity.store(true, Ordering::SeqCst);
    let viewers = join(&state, tab.id, &alice, board.id).await.expect("join still succeeds");
    assert_eq!(viewers[0].user_id, alice.id);
}

#[tokio::test]
async fn leave_with_other_tab_keeps_viewer() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let board = seed_board(&state, &alice).await;
    crate::services::board::add_member(
        &state,
        &alice,
        board.id,
        crate::services::board::MemberRef { user_id: Some(bob.id), email: None },
    )
    .await
    .expect("add");

    let tab1 = open_tab(&state, &alice).await;
    let tab2 = open_tab(&state, &alice).await;
    let mut watcher = open_tab(&state, &bob).await;
    join(&state, tab1.id, &alice, board.id).await.expect("join");
    join(&state, tab2.id, &alice, board.id).await.expect("join");
    join(&state, watcher.id, &bob, board.id).await.expect("join");
    drain(&mut watcher.rx).await;

    assert!(leave(&state, tab1.id, &alice, board.id).await);
    assert!(state.presence.is_viewing(board.id, alice.id));
    assert_channel_empty(&mut watcher.rx).await;

    assert!(leave(&state, tab2.id, &alice, board.id).await);
    assert!(!state.presence.is_viewing(board.id, alice.id));
    let update = next_with(&mut watcher.rx, "presence:update").await;
    assert_eq!(viewer_ids(&update), vec![bob.id]);
    let activity = next_with(&mut watcher.rx, "activity:created").await;
    assert_eq!(activity.data["kind"], "user_left_board");

    assert!(!leave(&state, tab2.id, &alice, board.id).await);
}

// =============================================================================
// disconnect / reap
// =============================================================================

#[tokio::test]
async fn disconnect_publishes_presence_without_activity() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let tab = open_tab(&state, &alice).await;
    join(&state, tab.id, &alice, board.id).await.expect("join");

    let watcher_id = Uuid::new_v4();
    let (tx, mut watcher) = mpsc::channel(16);
    state.channel.connect(watcher_id, None, tx).await;
    state.channel.join(watcher_id, Group::Board(board.id)).await;

    disconnect(&state, tab.id).await;
    let update = assert_channel_has_frame(&mut watcher).await;
    assert_eq!(update.syscall, "presence:update");
    assert!(viewer_ids(&update).is_empty());
    assert_channel_empty(&mut watcher).await;
    assert_eq!(state.store.list_activities(board.id, 50).await.expect("list").len(), 1);
    assert_eq!(state.presence.tracked_board_count(), 0);
}

#[tokio::test]
async fn closing_tab_vacates_boards_only_it_was_viewing() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let (b1, b2) = (seed_board(&state, &alice).await, seed_board(&state, &alice).await);
    let tab1 = open_tab(&state, &alice).await;
    let tab2 = open_tab(&state, &alice).await;
    join(&state, tab1.id, &alice, b1.id).await.expect("join");
    join(&state, tab1.id, &alice, b2.id).await.expect("join");
    join(&state, tab2.id, &alice, b2.id).await.expect("join");

    disconnect(&state, tab1.id).await;
    assert!(!state.presence.is_viewing(b1.id, alice.id));
    assert!(state.presence.is_viewing(b2.id, alice.id));
    assert_eq!(state.presence.connection_count(), 1);
}

#[tokio::test]
async fn reap_closes_queue_and_republishes_presence() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let board = seed_board(&state, &alice).await;
    set_sharing(&state, &alice, board.id, true).await.expect("public");

    let mut stale = open_tab(&state, &alice).await;
    let mut live = open_tab(&state, &bob).await;
    join(&state, stale.id, &alice, board.id).await.expect("join");
    join(&state, live.id, &bob, board.id).await.expect("join");
    drain(&mut live.rx).await;

    let timeout_ms = i64::try_from(state.presence.config().presence_timeout_ms()).expect("fits");
    heartbeat(&state, live.id, bob.id).await.expect("known");
    // Bob's heartbeat is fresh; only Alice's registration time has aged.
    let later = now_ms() + timeout_ms - 1;
    state.presence.heartbeat(live.id, later).expect("known");
    let removed = reap_expired(&state, later + 1).await;
    assert!(removed >= 1);

    let update = next_with(&mut live.rx, "presence:update").await;
    assert_eq!(viewer_ids(&update), vec![bob.id]);
    // The reaped socket's queue is gone.
    drain(&mut stale.rx).await;
    assert!(stale.rx.recv().await.is_none());
}

#[tokio::test]
async fn join_after_reap_is_refused_and_leaves_no_viewer() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let tab = open_tab(&state, &alice).await;

    let timeout_ms = i64::try_from(state.presence.config().presence_timeout_ms()).expect("fits");
    assert_eq!(reap_expired(&state, now_ms() + timeout_ms + 1).await, 1);

    let err = join(&state, tab.id, &alice, board.id).await.expect_err("reaped");
    assert!(matches!(err, BoardError::ConnectionNotFound(id) if id == tab.id));
    assert_eq!(state.presence.tracked_board_count(), 0);
    assert!(!state.presence.is_viewing(board.id, alice.id));
    assert_eq!(state.channel.group_size(&Group::Board(board.id)).await, 0);
    assert_eq!(reap_expired(&state, now_ms() + 2 * timeout_ms).await, 0);
    assert!(state.presence.board_viewers(board.id, now_ms()).is_empty());
}

#[tokio::test]
async fn join_on_unregistered_socket_is_refused() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;

    let err = join(&state, Uuid::new_v4(), &alice, board.id).await.expect_err("unknown socket");
    assert!(matches!(err, BoardError::ConnectionNotFound(_)));
    assert_eq!(state.presence.tracked_board_count(), 0);
    assert!(state.store.list_activities(board.id, 50).await.expect("list").is_empty());
}

#[tokio::test]
async fn evicted_socket_vacates_board_on_disconnect() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let bob = seed_user(&state, "bob").await;
    let board = seed_board(&state, &alice).await;
    add_member(&state, &alice, board.id, MemberRef { user_id: Some(bob.id), email: None })
        .await
        .expect("add bob");

    let mut watcher = open_tab(&state, &bob).await;
    join(&state, watcher.id, &bob, board.id).await.expect("join");
    drain(&mut watcher.rx).await;

    // Room for the presence update only; the join activity overflows it.
    let (tx, mut slow) = mpsc::channel(1);
    let slow_id = Uuid::new_v4();
    connect(&state, slow_id, Some(&alice), tx).await;
    join(&state, slow_id, &alice, board.id).await.expect("join");
    assert_eq!(assert_channel_has_frame(&mut slow).await.syscall, "presence:update");
    assert!(slow.recv().await.is_none());
    drain(&mut watcher.rx).await;

    // The socket loop ends on the closed queue and disconnects.
    disconnect(&state, slow_id).await;
    let update = next_with(&mut watcher.rx, "presence:update").await;
    assert_eq!(viewer_ids(&update), vec![bob.id]);
    assert!(!state.presence.is_viewing(board.id, alice.id));
}

#[tokio::test]
async fn heartbeat_unknown_connection_is_none() {
    let state = test_app_state();
    assert!(heartbeat(&state, Uuid::new_v4(), Uuid::new_v4()).await.is_none());
}

// =============================================================================
// move intents
// =============================================================================

#[tokio::test]
async fn move_intent_reaches_peers_but_not_sender() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let mut tab1 = open_tab(&state, &alice).await;
    let mut tab2 = open_tab(&state, &alice).await;
    join(&state, tab1.id, &alice, board.id).await.expect("join");
    join(&state, tab2.id, &alice, board.id).await.expect("join");
    drain(&mut tab1.rx).await;
    drain(&mut tab2.rx).await;

    let intent = MoveIntent {
        board_id: board.id,
        task_id: Uuid::new_v4(),
        source_column_id: board.columns[0].id,
        destination_column_id: board.columns[1].id,
        source_index: 0,
        destination_index: 0,
    };
    assert_eq!(move_intent(&state, tab1.id, &alice, &intent).await.expect("relay"), 1);
    let relayed = assert_channel_has_frame(&mut tab2.rx).await;
    assert_eq!(relayed.syscall, "task:move-intent");
    assert_eq!(relayed.from.as_deref(), Some(alice.id.to_string().as_str()));
    assert_channel_empty(&mut tab1.rx).await;
}

#[tokio::test]
async fn move_intent_requires_join() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let tab = open_tab(&state, &alice).await;
    let intent = MoveIntent {
        board_id: board.id,
        task_id: Uuid::new_v4(),
        source_column_id: Uuid::new_v4(),
        destination_column_id: Uuid::new_v4(),
        source_index: 0,
        destination_index: 0,
    };
    assert!(matches!(move_intent(&state, tab.id, &alice, &intent).await, Err(BoardError::Invalid(_))));
}

// =============================================================================
// profile
// =============================================================================

#[tokio::test]
async fn profile_update_refreshes_viewer_snapshots() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    let mut tab = open_tab(&state, &alice).await;
    join(&state, tab.id, &alice, board.id).await.expect("join");
    drain(&mut tab.rx).await;

    let patch: ProfilePatch = serde_json::from_str(r#"{"name": "Alice L", "avatar_url": null}"#).expect("patch");
    let updated = update_profile(&state, &alice, patch).await.expect("update");
    assert_eq!(updated.name, "Alice L");

    let update = next_with(&mut tab.rx, "presence:update").await;
    let payload: PresenceUpdate = update.decode().expect("decode");
    assert_eq!(payload.users[0].name, "Alice L");
    let stored = state.store.get_user(alice.id).await.expect("get").expect("exists");
    assert_eq!(stored.name, "Alice L");

    let err = update_profile(&state, &alice, ProfilePatch { name: Some(" ".into()), avatar_url: None })
        .await
        .expect_err("blank");
    assert!(matches!(err, BoardError::Invalid(_)));
}

// =============================================================================
// public viewers
// =============================================================================

#[tokio::test]
async fn public_join_requires_sharing() {
    let state = test_app_state();
    let alice = seed_user(&state, "alice").await;
    let board = seed_board(&state, &alice).await;
    assert!(join_public(&state, Uuid::new_v4(), "nope").await.is_err());

    let public_id = set_sharing(&state, &alice, board.id, true)
        .await
        .expect("share")
        .public_id
        .expect("id");
    let (tx, _rx) = mpsc::channel(8);
    let anon = Uuid::new_v4();
    connect(&state, anon, None, tx).await;
    let snapshot = join_public(&state, anon, &public_id).await.expect("public join");
    assert_eq!(snapshot.id, board.id);
    assert!(snapshot.owner_id.is_none());
    assert_eq!(state.channel.group_size(&Group::PublicShare(public_id)).await, 1);
    assert_eq!(state.presence.connection_count(), 0);
}
