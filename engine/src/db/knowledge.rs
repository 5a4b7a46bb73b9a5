//! SQLite-backed policy knowledge store
//!
//! Clauses are indexed in an FTS5 table with the trigram tokenizer and
//! ranked with bm25.

use super::{unix_now, Database};
use crate::knowledge::{fts_query, short_terms, split_paragraphs, Clause, KnowledgeStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sdk::errors::EngineError;
use sqlx::Row;
use std::path::Path;

enum StoreState {
    Ready(Database),
    Unavailable(String),
}

pub struct SqliteKnowledgeStore {
    state: StoreState,
}

impl SqliteKnowledgeStore {
    /// Open the store once at startup.
    ///
    /// Never fails: if the database cannot be opened the returned handle is
    /// not ready and every search reports the store as unavailable.
    pub async fn connect(db_path: &Path) -> Self {
        match Database::new(db_path).await {
            Ok(db) => {
                tracing::info!("Knowledge store ready at {}", db_path.display());
                Self {
                    state: StoreState::Ready(db),
                }
            }
            Err(e) => {
                tracing::error!("Knowledge store unavailable: {:#}", e);
                Self {
                    state: StoreState::Unavailable(e.to_string()),
                }
            }
        }
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            state: StoreState::Ready(db),
        }
    }

    fn db(&self) -> Result<&Database> {
        match &self.state {
            StoreState::Ready(db) => Ok(db),
            StoreState::Unavailable(reason) => {
                anyhow::bail!("knowledge store unavailable: {}", reason)
            }
        }
    }

    /// Ingest a document, one clause per paragraph. Returns the clause count.
    pub async fn add_document(&self, source: &str, content: &str) -> Result<usize> {
        let db = self.db()?;
        let paragraphs = split_paragraphs(content);
        if paragraphs.is_empty() {
            anyhow::bail!("document '{}' has no text", source);
        }

        let mut tx = db.pool().begin().await.context("Failed to begin transaction")?;

        let document_id: i64 =
            sqlx::query_scalar("INSERT INTO documents (source, added_at) VALUES (?, ?) RETURNING id")
                .bind(source)
                .bind(unix_now())
                .fetch_one(&mut *tx)
                .await
                .context("Failed to insert document")?;

        for (position, paragraph) in paragraphs.iter().enumerate() {
            sqlx::query("INSERT INTO clauses (document_id, position, content) VALUES (?, ?, ?)")
                .bind(document_id)
                .bind(position as i64)
                .bind(paragraph)
                .execute(&mut *tx)
                .await
                .context("Failed to insert clause")?;
        }

        tx.commit().await.context("Failed to commit document")?;

        tracing::info!(
            "Indexed '{}' as {} clauses",
            source,
            paragraphs.len()
        );
        Ok(paragraphs.len())
    }

    /// Number of indexed clauses
    pub async fn clause_count(&self) -> Result<i64> {
        let db = self.db()?;
        sqlx::query_scalar("SELECT COUNT(*) FROM clauses")
            .fetch_one(db.pool())
            .await
            .context("Failed to count clauses")
    }

    async fn search_fts(&self, db: &Database, expr: &str, limit: i64) -> Result<Vec<Clause>> {
        let rows = sqlx::query(
            r#"
            SELECT source, content, bm25(clauses_fts) AS rank
            FROM clauses_fts
            WHERE clauses_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(expr)
        .bind(limit)
        .fetch_all(db.pool())
        .await
        .context("Failed to execute FTS query on clauses_fts")?;

        Ok(rows
            .into_iter()
            .map(|row| Clause {
                source: row.get("source"),
                content: row.get("content"),
                rank: row.get("rank"),
            })
            .collect())
    }

    async fn search_like(&self, db: &Database, terms: &[String], limit: i64) -> Result<Vec<Clause>> {
        let mut found: Vec<Clause> = Vec::new();
        for term in terms {
            let rows = sqlx::query(
                r#"
                SELECT d.source AS source, c.content AS content
                FROM clauses c JOIN documents d ON d.id = c.document_id
                WHERE c.content LIKE ?
                ORDER BY c.id
                LIMIT ?
                "#,
            )
            .bind(format!("%{}%", term))
            .bind(limit)
            .fetch_all(db.pool())
            .await
            .context("Failed to execute LIKE query on clauses")?;

            for row in rows {
                let clause = Clause {
                    source: row.get("source"),
                    content: row.get("content"),
                    rank: 0.0,
                };
                if !found.iter().any(|c| c.content == clause.content) {
                    found.push(clause);
                }
            }
        }
        found.truncate(limit as usize);
        Ok(found)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    fn is_ready(&self) -> bool {
        matches!(self.state, StoreState::Ready(_))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Clause>, EngineError> {
        let db = self
            .db()
            .map_err(|e| EngineError::CollaboratorUnavailable(e.to_string()))?;
        let limit = limit.max(1) as i64;

        let mut clauses = match fts_query(query) {
            Some(expr) => self
                .search_fts(db, &expr, limit)
                .await
                .map_err(|e| EngineError::Database(format!("{:#}", e)))?,
            None => Vec::new(),
        };

        if clauses.is_empty() {
            let terms = short_terms(query);
            if !terms.is_empty() {
                clauses = self
                    .search_like(db, &terms, limit)
                    .await
                    .map_err(|e| EngineError::Database(format!("{:#}", e)))?;
            }
        }

        tracing::debug!("Knowledge search '{}' -> {} clauses", query, clauses.len());
        Ok(clauses)
    }
}
