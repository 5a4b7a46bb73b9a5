//! Worker contract
//!
//! Every task-type handler implements [`Worker`]. A worker receives its one
//! task by value plus a read-only view of earlier turns, and hands back the
//! completed task. It never sees sibling tasks or the board.

use crate::history::HistoryEntry;
use crate::task::{Task, TaskType};
use async_trait::async_trait;

/// What a worker hands back to the orchestrator
#[derive(Debug, Clone)]
pub struct WorkerOutput {
    /// The task, normally with `status = done`
    pub task: Task,
    /// Intermediate trace entries, threaded into history for observability
    pub side_messages: Vec<HistoryEntry>,
}

impl WorkerOutput {
    pub fn new(task: Task) -> Self {
        Self {
            task,
            side_messages: Vec::new(),
        }
    }

    pub fn with_side_messages(mut self, side_messages: Vec<HistoryEntry>) -> Self {
        self.side_messages = side_messages;
        self
    }
}

/// Uniform task-processing contract
///
/// Implementations must treat `task.input_content()` as their only source of
/// user intent. Collaborator failures are turned into a degraded textual
/// result; `handle` is infallible from the orchestrator's point of view.
#[async_trait]
pub trait Worker: Send + Sync {
    /// The task type this worker is registered for
    fn task_type(&self) -> TaskType;

    /// Process one task and return it completed
    async fn handle(&self, task: Task, history: &[HistoryEntry]) -> WorkerOutput;
}
