//! Optimistic task moves and their reconciliation.
//!
//! DESIGN
//! ======
//! Each task moves through `Idle -> Dragging -> AwaitingConfirmation` and
//! leaves the last state as either reconciled or rolled back. Only three
//! things drive a transition: a user action (drag, drop), a request
//! completion, or an event from the server.
//!
//! On drop the view is spliced at once and the guess is kept as a
//! [`TaskMoved`] tuple. Server events always win:
//! - an event equal to the guess clears the pending record (nothing to redraw)
//! - any other `task:moved` / `task:updated` for the task is applied as is and
//!   the record stays until a matching event or the request outcome
//! - a failed request puts the task back where the drag started, unless an
//!   event already replaced the guess
//!
//! Placement is always re-derived from the event payload, so several events
//! arriving before the request resolves are applied in order and the last
//! one stands.

#[cfg(test)]
#[path = "moves_test.rs"]
mod moves_test;

use std::collections::HashMap;

use frames::Frame;
use frames::events::{self, MoveIntent, TaskMoved, TaskUpdated};
use log::{debug, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::error::ClientError;
use crate::state::board::{BoardView, Placement};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MovePhase {
    Idle,
    Dragging,
    AwaitingConfirmation,
}

/// Outcome of feeding a request result or server event to the tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reconciliation {
    /// The event matched the guess. Pending cleared, view already right.
    Confirmed,
    /// The server placed the task somewhere other than the guess and the view
    /// now shows the server's placement. `settled` is true when the pending
    /// record was cleared.
    Corrected { settled: bool },
    /// Request succeeded; the confirming event has not arrived yet.
    Awaiting,
    /// Request failed. `reverted` is false when a server event had already
    /// replaced the optimistic placement, so there was nothing to undo.
    RolledBack { error: ClientError, reverted: bool },
    /// Nothing was pending for the task.
    Untracked,
}

/// A move applied locally and not yet settled by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingMove {
    /// The move as this client applied it.
    pub guess: TaskMoved,
    /// True until the request completes.
    pub syncing: bool,
    /// The move as the server applied it, from the request response.
    pub confirmed: Option<TaskMoved>,
    /// Server moves of this task applied while pending, in arrival order.
    pub seen: Vec<TaskMoved>,
    /// A server event replaced the optimistic placement.
    pub overridden: bool,
}

impl PendingMove {
    fn settles(&self, moved: &TaskMoved) -> bool {
        *moved == self.guess || self.confirmed.as_ref() == Some(moved)
    }
}

/// Body for `PUT /api/boards/{id}/tasks/{task_id}/move`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MoveRequestBody {
    pub source_column_id: Uuid,
    pub destination_column_id: Uuid,
    pub source_index: usize,
    pub destination_index: usize,
}

/// What a drop asks the caller to send.
#[derive(Clone, Debug, PartialEq)]
pub struct MoveSubmission {
    pub board_id: Uuid,
    pub task_id: Uuid,
    pub request: MoveRequestBody,
    /// `task:move-intent` frame for the websocket.
    pub intent: Frame,
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    task_id: Uuid,
    origin: Placement,
}

#[derive(Clone, Debug, Default)]
pub struct MoveTracker {
    drag: Option<Drag>,
    pending: HashMap<Uuid, PendingMove>,
}

impl MoveTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn phase(&self, task_id: Uuid) -> MovePhase {
        if self.pending.contains_key(&task_id) {
            MovePhase::AwaitingConfirmation
        } else if self.drag.is_some_and(|d| d.task_id == task_id) {
            MovePhase::Dragging
        } else {
            MovePhase::Idle
        }
    }

    #[must_use]
    pub fn pending(&self, task_id: Uuid) -> Option<&PendingMove> {
        self.pending.get(&task_id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Forget every drag and pending move. Used when the view is rebuilt
    /// from a fresh snapshot.
    pub fn clear(&mut self) {
        self.drag = None;
        self.pending.clear();
    }

    // =========================================================================
    // USER ACTIONS
    // =========================================================================

    /// Start dragging a task. Replaces any drag already in progress.
    ///
    /// # Errors
    ///
    /// `MoveInFlight` when the task's previous move has not settled;
    /// `UnknownTask` when the task is not on the board.
    pub fn begin_drag(&mut self, view: &BoardView, task_id: Uuid) -> Result<Placement, ClientError> {
        if self.pending.contains_key(&task_id) {
            return Err(ClientError::MoveInFlight(task_id));
        }
        let origin = view.locate(task_id).ok_or(ClientError::UnknownTask(task_id))?;
        self.drag = Some(Drag { task_id, origin });
        Ok(origin)
    }

    pub fn cancel_drag(&mut self) -> bool {
        self.drag.take().is_some()
    }

    /// Drop the dragged task: splice the view, remember the guess, and hand
    /// back the request and move-intent to send.
    ///
    /// `destination_index` counts positions after the task is lifted out, the
    /// same way the server reads it.
    ///
    /// # Errors
    ///
    /// `NotDragging`, `UnknownTask` (the task vanished mid-drag),
    /// `UnknownColumn`, or `InvalidIndex`. The drag ends either way.
    pub fn drop_on(
        &mut self,
        view: &mut BoardView,
        destination_column_id: Uuid,
        destination_index: usize,
    ) -> Result<MoveSubmission, ClientError> {
        let drag = self.drag.take().ok_or(ClientError::NotDragging)?;
        // Events may have moved the task since the drag began.
        let source = view.locate(drag.task_id).ok_or(ClientError::UnknownTask(drag.task_id))?;
        if source != drag.origin {
            debug!("task {} moved under the drag; using current placement", drag.task_id);
        }

        let destination = view
            .column(destination_column_id)
            .ok_or(ClientError::UnknownColumn(destination_column_id))?;
        let len = destination.task_ids.len() - usize::from(destination_column_id == source.column_id);
        if destination_index > len {
            return Err(ClientError::InvalidIndex { index: destination_index, len });
        }

        view.place(drag.task_id, destination_column_id, destination_index)?;

        let guess = TaskMoved {
            board_id: view.board_id,
            task_id: drag.task_id,
            source_column_id: source.column_id,
            destination_column_id,
            source_index: source.index,
            destination_index,
        };
        self.pending.insert(
            drag.task_id,
            PendingMove { guess, syncing: true, confirmed: None, seen: Vec::new(), overridden: false },
        );

        let intent = MoveIntent {
            board_id: guess.board_id,
            task_id: guess.task_id,
            source_column_id: guess.source_column_id,
            destination_column_id: guess.destination_column_id,
            source_index: guess.source_index,
            destination_index: guess.destination_index,
        };
        Ok(MoveSubmission {
            board_id: guess.board_id,
            task_id: guess.task_id,
            request: MoveRequestBody {
                source_column_id: guess.source_column_id,
                destination_column_id: guess.destination_column_id,
                source_index: guess.source_index,
                destination_index: guess.destination_index,
            },
            intent: Frame::event(events::TASK_MOVE_INTENT, &intent).with_board_id(guess.board_id),
        })
    }

    // =========================================================================
    // REQUEST COMPLETION
    // =========================================================================

    /// Feed the result of the move request for `task_id`.
    pub fn complete(
        &mut self,
        view: &mut BoardView,
        task_id: Uuid,
        result: Result<TaskMoved, ClientError>,
    ) -> Reconciliation {
        let Some(pending) = self.pending.get_mut(&task_id) else {
            return Reconciliation::Untracked;
        };

        match result {
            Ok(applied) => {
                if pending.seen.contains(&applied) {
                    // Our own event already came through and was applied.
                    self.pending.remove(&task_id);
                    return Reconciliation::Corrected { settled: true };
                }
                pending.syncing = false;
                pending.confirmed = Some(applied);
                Reconciliation::Awaiting
            }
            Err(error) => {
                let Some(pending) = self.pending.remove(&task_id) else {
                    return Reconciliation::Untracked;
                };
                let reverted = !pending.overridden;
                if reverted {
                    let guess = pending.guess;
                    if let Err(e) = view.place(task_id, guess.source_column_id, guess.source_index) {
                        warn!("rollback of task {task_id} failed: {e}");
                    }
                }
                info!("move of task {task_id} rolled back: {error}");
                Reconciliation::RolledBack { error, reverted }
            }
        }
    }

    // =========================================================================
    // SERVER EVENTS
    // =========================================================================

    /// Apply an authoritative `task:moved` and settle any pending guess.
    pub fn on_moved(&mut self, view: &mut BoardView, moved: &TaskMoved) -> Reconciliation {
        if let Err(e) = view.apply_moved(moved) {
            warn!("task:moved for {} not applied: {e}", moved.task_id);
        }

        let Some(pending) = self.pending.get_mut(&moved.task_id) else {
            return Reconciliation::Untracked;
        };
        if pending.settles(moved) {
            let overridden = pending.overridden || *moved != pending.guess;
            self.pending.remove(&moved.task_id);
            return if overridden {
                Reconciliation::Corrected { settled: true }
            } else {
                Reconciliation::Confirmed
            };
        }

        info!(
            "move conflict on task {}: guessed {}@{}, server says {}@{}",
            moved.task_id,
            pending.guess.destination_column_id,
            pending.guess.destination_index,
            moved.destination_column_id,
            moved.destination_index
        );
        pending.seen.push(*moved);
        pending.overridden = true;
        Reconciliation::Corrected { settled: false }
    }

    /// Apply a `task:updated`. Its placement is authoritative; when it
    /// disagrees with a pending guess the guess is discarded from the view.
    pub fn on_updated(&mut self, view: &mut BoardView, updated: &TaskUpdated) -> Reconciliation {
        if let Err(e) = view.apply_updated(updated) {
            warn!("task:updated for {} not applied: {e}", updated.task.id);
        }

        let Some(pending) = self.pending.get_mut(&updated.task.id) else {
            return Reconciliation::Untracked;
        };
        let guess = &pending.guess;
        if guess.destination_column_id == updated.column_id && guess.destination_index == updated.position {
            return Reconciliation::Awaiting;
        }
        info!("task {} updated elsewhere while a move was pending", updated.task.id);
        pending.overridden = true;
        Reconciliation::Corrected { settled: false }
    }

    /// The task is gone; drop any drag or pending move for it.
    pub fn on_deleted(&mut self, task_id: Uuid) -> bool {
        if self.drag.is_some_and(|d| d.task_id == task_id) {
            self.drag = None;
        }
        self.pending.remove(&task_id).is_some()
    }
}
