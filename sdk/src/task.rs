//! Task model
//!
//! A [`Task`] is one decomposed unit of user intent with a stable identity.
//! Its identity, type and isolated input are fixed at creation; the only
//! mutation available is [`Task::complete`], which moves it to `done` and
//! records the result.

use crate::errors::EngineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque unique task identifier, used as the sole merge key on the board
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Generate a fresh random identifier
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The closed set of worker capabilities known at build time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Fares, timetables and ticketing questions
    Ticket,
    /// Passenger complaints and feedback
    Complaint,
    /// Greetings, small talk and policy questions (the fallback type)
    General,
    /// Staff-side management requests
    Manager,
    /// News, incident and public-opinion analysis backed by web search
    Judge,
}

impl TaskType {
    /// All task types, in planner prompt order
    pub const ALL: [TaskType; 5] = [
        TaskType::Ticket,
        TaskType::Complaint,
        TaskType::General,
        TaskType::Manager,
        TaskType::Judge,
    ];

    /// The designated fallback type for unclassifiable requests
    pub const FALLBACK: TaskType = TaskType::General;

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Ticket => "ticket",
            TaskType::Complaint => "complaint",
            TaskType::General => "general",
            TaskType::Manager => "manager",
            TaskType::Judge => "judge",
        }
    }

    /// One-line description shown to the planner
    pub fn capability(&self) -> &'static str {
        match self {
            TaskType::Ticket => "fare lookups, first/last train times, ticketing and route questions",
            TaskType::Complaint => "passenger complaints and feedback that need a complaint ticket",
            TaskType::General => {
                "greetings, small talk, station rules and policy questions (default choice)"
            }
            TaskType::Manager => "staff rostering, quality inspection, monitoring and training",
            TaskType::Judge => "news, incident causes and public opinion that need a web search",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = EngineError;

    /// Parse a task type tag. Legacy `*_agent` names and `fare` are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let tag = normalized.strip_suffix("_agent").unwrap_or(&normalized);
        match tag {
            "ticket" | "fare" => Ok(TaskType::Ticket),
            "complaint" => Ok(TaskType::Complaint),
            "general" | "general_chat" => Ok(TaskType::General),
            "manager" => Ok(TaskType::Manager),
            "judge" => Ok(TaskType::Judge),
            _ => Err(EngineError::UnknownTaskType(s.to_string())),
        }
    }
}

/// Task lifecycle status. Monotonic within a turn: `done` never reverts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Done,
}

/// One dispatchable unit of work
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    task_type: TaskType,
    description: String,
    input_content: String,
    status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<String>,
}

impl Task {
    /// Create a pending task with a freshly generated id
    pub fn new(
        task_type: TaskType,
        description: impl Into<String>,
        input_content: impl Into<String>,
    ) -> Self {
        Self::with_id(TaskId::generate(), task_type, description, input_content)
    }

    /// Create a pending task with a caller-chosen id
    pub fn with_id(
        id: TaskId,
        task_type: TaskType,
        description: impl Into<String>,
        input_content: impl Into<String>,
    ) -> Self {
        Self {
            id,
            task_type,
            description: description.into(),
            input_content: input_content.into(),
            status: TaskStatus::Pending,
            result: None,
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn task_type(&self) -> TaskType {
        self.task_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The isolated slice of user intent this task is responsible for
    pub fn input_content(&self) -> &str {
        &self.input_content
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.status == TaskStatus::Pending
    }

    pub fn is_done(&self) -> bool {
        self.status == TaskStatus::Done
    }

    /// Mark the task done with its final textual result
    pub fn complete(mut self, result: impl Into<String>) -> Self {
        self.status = TaskStatus::Done;
        self.result = Some(result.into());
        self
    }

    /// Overlay the mutable fields of `update` onto this task.
    ///
    /// Callers must have checked that `update` refers to the same task.
    pub(crate) fn overlay(&mut self, update: Task) {
        self.status = update.status;
        if update.result.is_some() {
            self.result = update.result;
        }
        if !update.description.is_empty() {
            self.description = update.description;
        }
    }
}
