use super::*;

fn identity(name: &str) -> Identity {
    Identity { user_id: Uuid::new_v4(), name: name.into(), avatar_url: None }
}

fn registry() -> PresenceRegistry {
    PresenceRegistry::new(PresenceConfig::default())
}

// =============================================================================
// config
// =============================================================================

#[test]
fn config_rejects_timeout_not_above_interval() {
    assert!(PresenceConfig::new(30_000, 30_000).is_err());
    assert!(PresenceConfig::new(30_000, 10_000).is_err());
    assert!(PresenceConfig::new(0, 10_000).is_err());
    let ok = PresenceConfig::new(1_000, 1_500).expect("valid");
    assert_eq!(ok.heartbeat_interval_ms(), 1_000);
    assert_eq!(ok.presence_timeout_ms(), 1_500);
}

#[test]
fn default_config_matches_documented_values() {
    let config = PresenceConfig::default();
    assert_eq!(config.heartbeat_interval_ms(), 30_000);
    assert_eq!(config.presence_timeout_ms(), 45_000);
}

// =============================================================================
// connections
// =============================================================================

#[test]
fn register_reports_online() {
    let reg = registry();
    let alice = identity("alice");
    let presence = reg.register_connection(Uuid::new_v4(), &alice, 1_000);
    assert_eq!(presence.user_id, alice.user_id);
    assert_eq!(presence.status, PresenceStatus::Online);
    assert_eq!(presence.last_seen, 1_000);
    assert_eq!(reg.connection_count(), 1);
}

#[test]
fn closing_one_of_two_tabs_keeps_user_viewing() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    let (tab1, tab2) = (Uuid::new_v4(), Uuid::new_v4());
    reg.register_connection(tab1, &alice, 0);
    reg.register_connection(tab2, &alice, 0);
    assert!(reg.join_board(board, &alice, 0));

    let first = reg.unregister_connection(tab1).expect("known connection");
    assert!(!first.went_offline);
    assert!(first.vacated_boards.is_empty());
    assert!(reg.is_viewing(board, alice.user_id));

    let second = reg.unregister_connection(tab2).expect("known connection");
    assert!(second.went_offline);
    assert_eq!(second.vacated_boards, vec![board]);
    assert!(!reg.is_viewing(board, alice.user_id));
    assert_eq!(reg.tracked_board_count(), 0);
}

#[test]
fn unregister_unknown_connection_is_none() {
    assert!(registry().unregister_connection(Uuid::new_v4()).is_none());
}

#[test]
fn heartbeat_unknown_connection_is_none() {
    assert!(registry().heartbeat(Uuid::new_v4(), 5).is_none());
}

#[test]
fn heartbeat_never_moves_backwards() {
    let reg = registry();
    let alice = identity("alice");
    let conn = Uuid::new_v4();
    reg.register_connection(conn, &alice, 10_000);
    reg.heartbeat(conn, 5_000).expect("known");
    // A late heartbeat must not make the connection look older than it is.
    assert!(reg.reap_expired(10_000 + 44_999).is_empty());
}

// =============================================================================
// boards
// =============================================================================

#[test]
fn viewer_listed_once_across_connections() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    reg.register_connection(Uuid::new_v4(), &alice, 0);
    reg.register_connection(Uuid::new_v4(), &alice, 0);

    assert!(reg.join_board(board, &alice, 0));
    assert!(!reg.join_board(board, &alice, 1));

    let viewers = reg.board_viewers(board, 1);
    assert_eq!(viewers.len(), 1);
    assert_eq!(viewers[0].user_id, alice.user_id);
}

#[test]
fn viewers_are_join_ordered() {
    let reg = registry();
    let board = Uuid::new_v4();
    let people: Vec<Identity> = ["carol", "alice", "bob"].iter().map(|n| identity(n)).collect();
    for (i, who) in people.iter().enumerate() {
        reg.register_connection(Uuid::new_v4(), who, 0);
        reg.join_board(board, who, i64::try_from(i).expect("small"));
    }
    let names: Vec<String> = reg.board_viewers(board, 5).into_iter().map(|p| p.name).collect();
    assert_eq!(names, vec!["carol", "alice", "bob"]);
}

#[test]
fn last_leave_drops_board_entry() {
    let reg = registry();
    let (alice, bob) = (identity("alice"), identity("bob"));
    let board = Uuid::new_v4();
    reg.join_board(board, &alice, 0);
    reg.join_board(board, &bob, 0);

    assert!(reg.leave_board(board, alice.user_id));
    assert_eq!(reg.tracked_board_count(), 1);
    assert!(reg.leave_board(board, bob.user_id));
    assert_eq!(reg.tracked_board_count(), 0);
    assert!(reg.board_viewers(board, 0).is_empty());
}

#[test]
fn leave_unknown_board_or_user_is_false() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    assert!(!reg.leave_board(board, alice.user_id));
    reg.join_board(board, &alice, 0);
    assert!(!reg.leave_board(board, Uuid::new_v4()));
}

#[test]
fn stale_viewer_reads_offline_before_reap() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    reg.register_connection(Uuid::new_v4(), &alice, 0);
    reg.join_board(board, &alice, 0);

    assert_eq!(reg.board_viewers(board, 44_999)[0].status, PresenceStatus::Online);
    assert_eq!(reg.board_viewers(board, 45_000)[0].status, PresenceStatus::Offline);
}

// =============================================================================
// reaper
// =============================================================================

#[test]
fn reap_removes_connection_at_timeout_boundary() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    let conn = Uuid::new_v4();
    reg.register_connection(conn, &alice, 0);
    reg.join_board(board, &alice, 0);

    assert!(reg.reap_expired(44_999).is_empty());
    let reaped = reg.reap_expired(45_000);
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].connection_id, conn);
    assert_eq!(reaped[0].user_id, alice.user_id);
    assert_eq!(reaped[0].connected_for_ms, 45_000);
    assert_eq!(reaped[0].vacated_boards, vec![board]);
    assert_eq!(reg.connection_count(), 0);
    assert_eq!(reg.tracked_board_count(), 0);
}

#[test]
fn join_via_reaped_connection_records_nothing() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    let conn = Uuid::new_v4();
    reg.register_connection(conn, &alice, 0);
    assert_eq!(reg.join_board_via(conn, board, &alice, 0), Some(true));
    assert_eq!(reg.join_board_via(conn, board, &alice, 1), Some(false));

    assert_eq!(reg.reap_expired(45_000).len(), 1);
    assert_eq!(reg.join_board_via(conn, board, &alice, 45_001), None);
    assert_eq!(reg.tracked_board_count(), 0);
    assert!(reg.board_viewers(board, 45_001).is_empty());
}

#[test]
fn join_via_another_users_connection_is_refused() {
    let reg = registry();
    let (alice, bob) = (identity("alice"), identity("bob"));
    let conn = Uuid::new_v4();
    reg.register_connection(conn, &alice, 0);

    assert_eq!(reg.join_board_via(conn, Uuid::new_v4(), &bob, 0), None);
    assert_eq!(reg.tracked_board_count(), 0);
}

#[test]
fn heartbeat_keeps_connection_alive() {
    let reg = registry();
    let alice = identity("alice");
    let conn = Uuid::new_v4();
    reg.register_connection(conn, &alice, 0);

    reg.heartbeat(conn, 30_000).expect("known");
    assert!(reg.reap_expired(60_000).is_empty());
    assert_eq!(reg.reap_expired(75_000).len(), 1);
}

#[test]
fn reaping_one_stale_tab_keeps_user_on_board() {
    let reg = registry();
    let alice = identity("alice");
    let board = Uuid::new_v4();
    let (stale, live) = (Uuid::new_v4(), Uuid::new_v4());
    reg.register_connection(stale, &alice, 0);
    reg.register_connection(live, &alice, 40_000);
    reg.join_board(board, &alice, 0);

    let reaped = reg.reap_expired(50_000);
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].connection_id, stale);
    assert!(reaped[0].vacated_boards.is_empty());
    assert!(reg.is_viewing(board, alice.user_id));
}

// =============================================================================
// profile
// =============================================================================

#[test]
fn refresh_profile_rewrites_viewer_snapshots() {
    let reg = registry();
    let alice = identity("alice");
    let (b1, b2) = (Uuid::new_v4(), Uuid::new_v4());
    reg.register_connection(Uuid::new_v4(), &alice, 0);
    reg.join_board(b1, &alice, 0);
    reg.join_board(b2, &alice, 0);

    let renamed = Identity { name: "Alice Liddell".into(), avatar_url: Some("https://a/x.png".into()), ..alice.clone() };
    let mut changed = reg.refresh_profile(&renamed);
    let mut expected = vec![b1, b2];
    changed.sort_unstable();
    expected.sort_unstable();
    assert_eq!(changed, expected);
    assert_eq!(reg.board_viewers(b1, 0)[0].name, "Alice Liddell");
    assert_eq!(reg.user_presence(alice.user_id, 0).expect("online").name, "Alice Liddell");

    assert!(reg.refresh_profile(&renamed).is_empty());
}

#[test]
fn user_presence_is_none_without_connections() {
    let reg = registry();
    assert!(reg.user_presence(Uuid::new_v4(), 0).is_none());
}

#[test]
fn clones_share_state() {
    let reg = registry();
    let other = reg.clone();
    reg.register_connection(Uuid::new_v4(), &identity("alice"), 0);
    assert_eq!(other.connection_count(), 1);
}

#[test]
fn boards_for_user_lists_viewed_boards() {
    let reg = registry();
    let alice = identity("alice");
    let (b1, b2) = (Uuid::new_v4(), Uuid::new_v4());
    reg.join_board(b1, &alice, 0);
    reg.join_board(b2, &alice, 0);
    let mut expected = vec![b1, b2];
    expected.sort_unstable();
    assert_eq!(reg.boards_for_user(alice.user_id), expected);
    assert!(reg.boards_for_user(Uuid::new_v4()).is_empty());
}
