//! Durable session state
//!
//! The orchestrator checkpoints a session's board and history through a
//! [`SessionStore`] and restores them at the start of every turn. The store
//! is checkpoint/restore only: it knows nothing about turns or tasks.

use async_trait::async_trait;
use sdk::board::Board;
use sdk::errors::EngineError;
use sdk::history::ConversationHistory;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Everything persisted for one session
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub board: Board,
    pub history: ConversationHistory,
    /// Derived from the first user message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl SessionState {
    /// Number of completed turns (final replies) in the history
    pub fn turns(&self) -> usize {
        self.history
            .entries()
            .iter()
            .filter(|e| e.kind == sdk::history::EntryKind::FinalReply)
            .count()
    }
}

/// One row of `switchboard sessions`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub title: Option<String>,
    pub turns: usize,
    /// Unix seconds
    pub updated_at: i64,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load a session; unknown ids yield the empty state
    async fn load(&self, session_id: &str) -> Result<SessionState, EngineError>;

    /// Overwrite the checkpoint for `session_id`
    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), EngineError>;

    /// All sessions, most recently updated first
    async fn list(&self) -> Result<Vec<SessionSummary>, EngineError>;
}

/// Process-local store for ephemeral runs and tests
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, (SessionState, i64)>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn load(&self, session_id: &str) -> Result<SessionState, EngineError> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .map(|(state, _)| state.clone())
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), EngineError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            session_id.to_string(),
            (state.clone(), chrono::Utc::now().timestamp()),
        );
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, EngineError> {
        let sessions = self.sessions.read().await;
        let mut summaries: Vec<SessionSummary> = sessions
            .iter()
            .map(|(id, (state, updated_at))| SessionSummary {
                session_id: id.clone(),
                title: state.title.clone(),
                turns: state.turns(),
                updated_at: *updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.session_id.cmp(&b.session_id))
        });
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::board::BoardUpdate;
    use sdk::history::HistoryEntry;
    use sdk::task::{Task, TaskType};

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemorySessionStore::new();
        let state = store.load("nobody").await.unwrap();
        assert!(state.board.is_empty());
        assert!(state.history.is_empty());
        assert_eq!(state.title, None);
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let store = InMemorySessionStore::new();

        let mut state = SessionState::default();
        state.history.append(HistoryEntry::user("last train?"));
        state.history.append(HistoryEntry::reply("22:30"));
        state.board = state
            .board
            .apply(BoardUpdate::Task(Task::new(TaskType::Ticket, "t", "last train")))
            .unwrap();
        state.title = state.history.title();

        store.save("s1", &state).await.unwrap();
        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, state);
        assert_eq!(loaded.turns(), 1);

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title.as_deref(), Some("last train?"));
    }
}
