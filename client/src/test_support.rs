//! Fixtures shared by the client tests.

use frames::events::{BoardSnapshot, ColumnCard, TaskCard, TaskMoved};
use uuid::Uuid;

/// A three-column board: "To Do" holds `tasks`, the others start empty.
pub struct Fixture {
    pub board_id: Uuid,
    pub todo: Uuid,
    pub doing: Uuid,
    pub done: Uuid,
    pub tasks: Vec<Uuid>,
}

impl Fixture {
    pub fn new(task_count: usize) -> Self {
        Self {
            board_id: Uuid::new_v4(),
            todo: Uuid::new_v4(),
            doing: Uuid::new_v4(),
            done: Uuid::new_v4(),
            tasks: (0..task_count).map(|_| Uuid::new_v4()).collect(),
        }
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        let column = |id: Uuid, title: &str, task_ids: Vec<Uuid>| ColumnCard { id, title: title.into(), task_ids };
        BoardSnapshot {
            id: self.board_id,
            title: "Launch".into(),
            description: String::new(),
            owner_id: Some(Uuid::new_v4()),
            members: Vec::new(),
            is_public: false,
            public_id: None,
            columns: vec![
                column(self.todo, "To Do", self.tasks.clone()),
                column(self.doing, "In Progress", Vec::new()),
                column(self.done, "Done", Vec::new()),
            ],
            tasks: self
                .tasks
                .iter()
                .enumerate()
                .map(|(i, id)| card(*id, &format!("task {i}")))
                .collect(),
            updated_at: 0,
        }
    }

    pub fn moved(&self, task_id: Uuid, from: (Uuid, usize), to: (Uuid, usize)) -> TaskMoved {
        TaskMoved {
            board_id: self.board_id,
            task_id,
            source_column_id: from.0,
            destination_column_id: to.0,
            source_index: from.1,
            destination_index: to.1,
        }
    }
}

pub fn card(id: Uuid, title: &str) -> TaskCard {
    TaskCard {
        id,
        title: title.into(),
        description: String::new(),
        priority: None,
        due_date: None,
        assignee_id: None,
        suggestion: None,
    }
}
