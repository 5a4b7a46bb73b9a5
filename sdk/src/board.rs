//! Task board and merge reducer
//!
//! The board is the ordered collection of tasks for the current user turn.
//! It is never mutated in place by workers: every change arrives as a
//! [`BoardUpdate`] and is folded in by [`reduce`].
//!
//! Updates touch only the slot of their own task id, so applying the
//! results of concurrently completing workers in any order converges to
//! the same board.

use crate::errors::EngineError;
use crate::task::{Task, TaskId, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Ordered collection of tasks for one user turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    tasks: Vec<Task>,
}

impl Board {
    /// Create an empty board
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    /// Look up a task by id
    pub fn get(&self, id: &TaskId) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    /// Tasks still waiting for a worker, in board order
    pub fn pending(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.is_pending()).collect()
    }

    pub fn has_pending(&self) -> bool {
        self.tasks.iter().any(Task::is_pending)
    }

    /// Fold an update into this board, consuming it
    pub fn apply(mut self, update: BoardUpdate) -> Result<Board, ReducerConflict> {
        match update {
            BoardUpdate::Reset => Ok(Board::new()),
            BoardUpdate::Task(task) => {
                self.merge_all(vec![task])?;
                Ok(self)
            }
            BoardUpdate::Tasks(tasks) => {
                self.merge_all(tasks)?;
                Ok(self)
            }
        }
    }

    fn merge_all(&mut self, updates: Vec<Task>) -> Result<(), ReducerConflict> {
        let mut index: HashMap<TaskId, usize> = self
            .tasks
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id().clone(), i))
            .collect();

        for update in updates {
            match index.get(update.id()) {
                Some(&slot) => {
                    check_compatible(&self.tasks[slot], &update)?;
                    self.tasks[slot].overlay(update);
                }
                None => {
                    index.insert(update.id().clone(), self.tasks.len());
                    self.tasks.push(update);
                }
            }
        }

        Ok(())
    }
}

impl<'a> IntoIterator for &'a Board {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}

/// The three update shapes the reducer accepts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum BoardUpdate {
    /// Terminal reset: discard every task and start the next turn empty
    Reset,
    /// Overlay one task by id, or append it if unseen
    Task(Task),
    /// Apply each element in order, as for [`BoardUpdate::Task`]
    Tasks(Vec<Task>),
}

/// An update that would break a board invariant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: {reason}")]
pub struct ReducerConflict {
    pub task_id: TaskId,
    pub reason: String,
}

impl From<ReducerConflict> for EngineError {
    fn from(conflict: ReducerConflict) -> Self {
        EngineError::ReducerConflict(conflict.to_string())
    }
}

/// Merge `update` into `current` and return the resulting board.
///
/// Pure: `current` is left untouched. Rules:
/// - `Reset` yields the empty board.
/// - A task whose id is already present is overlaid in place, keeping the
///   board order; an unseen id is appended.
/// - A list is applied element by element, in list order.
pub fn reduce(current: &Board, update: BoardUpdate) -> Result<Board, ReducerConflict> {
    current.clone().apply(update)
}

fn check_compatible(existing: &Task, update: &Task) -> Result<(), ReducerConflict> {
    let conflict = |reason: &str| ReducerConflict {
        task_id: existing.id().clone(),
        reason: reason.to_string(),
    };

    if existing.task_type() != update.task_type() {
        return Err(conflict("task_type changed after creation"));
    }
    if existing.input_content() != update.input_content() {
        return Err(conflict("input_content changed after creation"));
    }
    if existing.status() == TaskStatus::Done {
        if update.status() == TaskStatus::Pending {
            return Err(conflict("status reverted from done to pending"));
        }
        if existing.result() != update.result() {
            return Err(conflict("task completed twice with different results"));
        }
    }

    Ok(())
}
