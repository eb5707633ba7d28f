use super::*;

fn board_with_tasks(per_column: &[usize]) -> (Board, Vec<Vec<Uuid>>) {
    let mut board = Board::new(Uuid::new_v4(), "Sprint", "", 0);
    let mut ids = Vec::new();
    for (column, count) in board.columns.iter_mut().zip(per_column) {
        let col_ids: Vec<Uuid> = (0..*count).map(|_| Uuid::new_v4()).collect();
        column.task_ids.clone_from(&col_ids);
        ids.push(col_ids);
    }
    (board, ids)
}

#[test]
fn new_board_has_default_columns() {
    let board = Board::new(Uuid::new_v4(), "Roadmap", "", 10);
    let titles: Vec<&str> = board.columns.iter().map(|c| c.title.as_str()).collect();
    assert_eq!(titles, vec!["To Do", "In Progress", "Done"]);
    assert!(board.columns.iter().all(|c| c.task_ids.is_empty()));
    assert_eq!(board.created_at, 10);
}

#[test]
fn access_rules() {
    let owner = Uuid::new_v4();
    let member = Uuid::new_v4();
    let stranger = Uuid::new_v4();
    let mut board = Board::new(owner, "b", "", 0);
    board.members.push(member);

    assert!(board.can_edit(owner));
    assert!(board.can_edit(member));
    assert!(!board.can_view(stranger));

    board.is_public = true;
    assert!(board.can_view(stranger));
    assert!(!board.can_edit(stranger));
}

#[test]
fn apply_move_across_columns_reports_actual_source_index() {
    let (mut board, ids) = board_with_tasks(&[3, 1, 0]);
    let (todo, doing) = (board.columns[0].id, board.columns[1].id);
    let task = ids[0][1];

    let applied = board.apply_move(task, todo, doing, 0).expect("move");
    assert_eq!(applied, AppliedMove { source_index: 1, destination_index: 0 });
    assert_eq!(board.columns[0].task_ids, vec![ids[0][0], ids[0][2]]);
    assert_eq!(board.columns[1].task_ids, vec![task, ids[1][0]]);
}

#[test]
fn apply_move_within_column_uses_post_removal_index() {
    let (mut board, ids) = board_with_tasks(&[3, 0, 0]);
    let todo = board.columns[0].id;
    let first = ids[0][0];

    // Last slot after removal is index 2.
    board.apply_move(first, todo, todo, 2).expect("move to end");
    assert_eq!(board.columns[0].task_ids, vec![ids[0][1], ids[0][2], first]);

    let err = board.apply_move(first, todo, todo, 3).expect_err("past end");
    assert_eq!(err, EditError::IndexOutOfRange { index: 3, max: 2 });
}

#[test]
fn apply_move_rejects_task_outside_source_column_without_mutating() {
    let (mut board, ids) = board_with_tasks(&[1, 1, 0]);
    let before = board.clone();
    let (todo, doing, done) = (board.columns[0].id, board.columns[1].id, board.columns[2].id);

    let err = board.apply_move(ids[1][0], todo, done, 0).expect_err("wrong source");
    assert_eq!(err, EditError::TaskNotInColumn { task_id: ids[1][0], column_id: todo });

    let err = board.apply_move(ids[0][0], todo, doing, 5).expect_err("bad index");
    assert!(matches!(err, EditError::IndexOutOfRange { index: 5, max: 1 }));

    let ghost = Uuid::new_v4();
    let err = board.apply_move(ids[0][0], todo, ghost, 0).expect_err("bad column");
    assert_eq!(err, EditError::ColumnNotFound(ghost));

    assert_eq!(board, before);
}

#[test]
fn insert_and_remove_task_ids() {
    let (mut board, ids) = board_with_tasks(&[2, 0, 0]);
    let todo = board.columns[0].id;
    let new_id = Uuid::new_v4();

    assert_eq!(board.insert_task(todo, new_id, Some(1)), Ok(1));
    assert_eq!(board.locate_task(new_id), Some((todo, 1)));
    assert_eq!(board.insert_task(todo, Uuid::new_v4(), Some(9)), Err(EditError::IndexOutOfRange { index: 9, max: 3 }));

    assert_eq!(board.remove_task(new_id), Some((todo, 1)));
    assert_eq!(board.columns[0].task_ids, ids[0]);
    assert_eq!(board.remove_task(new_id), None);
}

#[test]
fn snapshot_orders_tasks_by_column_placement() {
    let (board, ids) = board_with_tasks(&[2, 1, 0]);
    let make = |id: Uuid, title: &str| Task {
        id,
        board_id: board.id,
        title: title.into(),
        description: String::new(),
        priority: None,
        due_date: None,
        assignee_id: None,
        suggestion: None,
        created_by: board.owner_id,
        created_at: 0,
        updated_at: 0,
    };
    let tasks = vec![make(ids[1][0], "c"), make(ids[0][1], "b"), make(ids[0][0], "a"), make(Uuid::new_v4(), "orphan")];

    let snapshot = board.snapshot(&tasks);
    let titles: Vec<&str> = snapshot.tasks.iter().map(|t| t.title.as_str()).collect();
    assert_eq!(titles, vec!["a", "b", "c"]);
    assert_eq!(snapshot.columns.len(), 3);
    assert_eq!(snapshot.owner_id, Some(board.owner_id));
}
