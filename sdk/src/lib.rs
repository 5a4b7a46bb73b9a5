//! Switchboard SDK
//!
//! Shared contract crate for the switchboard engine: the task and board
//! model, the merge reducer, conversation history, the worker contract and
//! tool argument/outcome types. No I/O happens here.

/// Task board and merge reducer
pub mod board;

/// Error types and handling
pub mod errors;

/// Conversation history
pub mod history;

/// Task model
pub mod task;

/// Tool argument/outcome types
pub mod types;

/// Worker contract
pub mod worker;

// Re-export commonly used types
pub use board::{reduce, Board, BoardUpdate, ReducerConflict};
pub use errors::{EngineError, SwitchboardErrorExt};
pub use history::{session_title, ConversationHistory, EntryKind, HistoryEntry, Role};
pub use task::{Task, TaskId, TaskStatus, TaskType};
pub use types::{ToolArgs, ToolError, ToolOutcome};
pub use worker::{Worker, WorkerOutput};
