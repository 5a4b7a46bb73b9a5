/// Session checkpoint persistence
///
/// One row per session; board and history are stored as JSON documents so
/// the schema does not follow every change to the task model.
use super::{unix_now, Database};
use crate::session::{SessionState, SessionStore, SessionSummary};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sqlx::Row;
use std::path::Path;

pub struct SqliteSessionStore {
    db: Database,
}

impl SqliteSessionStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Open (or create) the session database at `db_path`
    pub async fn open(db_path: &Path) -> Result<Self> {
        let db = Database::new(db_path)
            .await
            .context("Failed to open session database")?;
        Ok(Self::new(db))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    async fn load_row(&self, session_id: &str) -> Result<SessionState> {
        let row = sqlx::query("SELECT title, board, history FROM sessions WHERE session_id = ?")
            .bind(session_id)
            .fetch_optional(self.db.pool())
            .await
            .context("Failed to query session")?;

        let Some(row) = row else {
            return Ok(SessionState::default());
        };

        let board: String = row.get("board");
        let history: String = row.get("history");

        Ok(SessionState {
            board: serde_json::from_str(&board).context("Corrupt board checkpoint")?,
            history: serde_json::from_str(&history).context("Corrupt history checkpoint")?,
            title: row.get("title"),
        })
    }

    async fn save_row(&self, session_id: &str, state: &SessionState) -> Result<()> {
        let board = serde_json::to_string(&state.board).context("Failed to serialize board")?;
        let history =
            serde_json::to_string(&state.history).context("Failed to serialize history")?;
        let now = unix_now();

        sqlx::query(
            r#"
            INSERT INTO sessions (session_id, title, board, history, turns, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(session_id) DO UPDATE SET
                title = excluded.title,
                board = excluded.board,
                history = excluded.history,
                turns = excluded.turns,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(&state.title)
        .bind(board)
        .bind(history)
        .bind(state.turns() as i64)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .context("Failed to save session")?;

        Ok(())
    }

    async fn list_rows(&self) -> Result<Vec<SessionSummary>> {
        let rows = sqlx::query(
            "SELECT session_id, title, turns, updated_at FROM sessions \
             ORDER BY updated_at DESC, session_id ASC",
        )
        .fetch_all(self.db.pool())
        .await
        .context("Failed to list sessions")?;

        Ok(rows
            .into_iter()
            .map(|row| SessionSummary {
                session_id: row.get("session_id"),
                title: row.get("title"),
                turns: row.get::<i64, _>("turns") as usize,
                updated_at: row.get("updated_at"),
            })
            .collect())
    }
}

fn store_error(e: anyhow::Error) -> EngineError {
    EngineError::SessionStore(format!("{:#}", e))
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn load(&self, session_id: &str) -> Result<SessionState, EngineError> {
        self.load_row(session_id).await.map_err(store_error)
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), EngineError> {
        self.save_row(session_id, state).await.map_err(store_error)
    }

    async fn list(&self) -> Result<Vec<SessionSummary>, EngineError> {
        self.list_rows().await.map_err(store_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::board::BoardUpdate;
    use sdk::history::HistoryEntry;
    use sdk::task::{Task, TaskType};
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> SqliteSessionStore {
        SqliteSessionStore::open(&dir.path().join("sessions.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_missing_session_loads_empty() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert_eq!(store.load("new").await.unwrap(), SessionState::default());
    }

    #[tokio::test]
    async fn test_checkpoint_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let task = Task::new(TaskType::Complaint, "complaint", "escalator broken");
        let mut state = SessionState::default();
        state.history.append(HistoryEntry::user("escalator broken"));
        state.board = state.board.apply(BoardUpdate::Task(task.clone())).unwrap();
        state.title = state.history.title();
        store.save("s1", &state).await.unwrap();

        state.board = state
            .board
            .apply(BoardUpdate::Task(task.complete("CPT-0000ABCD")))
            .unwrap();
        store.save("s1", &state).await.unwrap();

        let loaded = store.load("s1").await.unwrap();
        assert_eq!(loaded, state);
        assert!(!loaded.board.has_pending());

        let listed = store.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session_id, "s1");
        assert_eq!(listed[0].turns, 0);
    }

    #[tokio::test]
    async fn test_corrupt_checkpoint_is_a_store_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        sqlx::query(
            "INSERT INTO sessions (session_id, board, history, created_at, updated_at) \
             VALUES ('bad', 'not json', '[]', 0, 0)",
        )
        .execute(store.database().pool())
        .await
        .unwrap();

        assert!(matches!(
            store.load("bad").await,
            Err(EngineError::SessionStore(_))
        ));
    }
}
