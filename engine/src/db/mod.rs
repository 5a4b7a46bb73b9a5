/// Database module for SQLite persistence
///
/// Session checkpoints and the policy knowledge base both live in SQLite,
/// opened through sqlx in WAL mode. Each store opens its own file; the
/// schema is the same everywhere so a single database can also hold both.
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::ConnectOptions;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

pub mod knowledge;
pub mod sessions;

pub use knowledge::SqliteKnowledgeStore;
pub use sessions::SqliteSessionStore;

/// Embedded migrations, applied in order on every open
const MIGRATIONS: [(&str, &str); 2] = [
    (
        "001_sessions.sql",
        include_str!("../../migrations/001_sessions.sql"),
    ),
    (
        "002_knowledge_fts.sql",
        include_str!("../../migrations/002_knowledge_fts.sql"),
    ),
];

/// Database connection pool
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if needed) the database at `db_path` and migrate it.
    ///
    /// SQLite replays any leftover WAL on open, so an unclean shutdown needs
    /// no extra recovery step.
    pub async fn new(db_path: &Path) -> Result<Self> {
        info!("Opening database at: {}", db_path.display());

        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
        }

        let connection_string = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&connection_string)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            .disable_statement_logging();

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        debug!("Database connection established");

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        for (name, sql) in MIGRATIONS {
            sqlx::raw_sql(sql)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to execute migration {}", name))?;
        }

        debug!("Database migrations completed");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoint the WAL into the main database file
    pub async fn flush_wal(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .context("Failed to flush WAL")?;

        debug!("WAL flushed");
        Ok(())
    }

    /// Flush the WAL and close all pooled connections
    pub async fn close(self) -> Result<()> {
        self.flush_wal().await?;
        self.pool.close().await;
        info!("Database connection closed");
        Ok(())
    }
}

/// Seconds since the Unix epoch
pub(crate) fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("test.db")).await.unwrap();

        let tables: Vec<String> =
            sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(db.pool())
                .await
                .unwrap();

        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"documents".to_string()));
        assert!(tables.contains(&"clauses".to_string()));
        assert!(tables.contains(&"clauses_fts".to_string()));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.db");

        let db = Database::new(&path).await.unwrap();
        db.close().await.unwrap();

        let db = Database::new(&path).await.unwrap();
        let journal_mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(journal_mode.to_lowercase(), "wal");
        db.close().await.unwrap();
    }
}
