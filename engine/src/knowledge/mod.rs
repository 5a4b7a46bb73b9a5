//! Policy knowledge store
//!
//! The document-lookup collaborator behind the `lookup_policy` tool. A
//! store is built once at process start and injected into the tool; when
//! the backing database cannot be opened an unavailable handle is injected
//! instead, and every lookup reports the store as unavailable.

use async_trait::async_trait;
use sdk::errors::EngineError;
use serde::Serialize;

/// One retrieved policy clause
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Clause {
    /// Document the clause came from (usually a file name)
    pub source: String,
    pub content: String,
    /// bm25 rank; lower is better
    pub rank: f64,
}

#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Whether the store was opened successfully and can serve lookups
    fn is_ready(&self) -> bool;

    /// Best matching clauses for `query`, best first, at most `limit`
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<Clause>, EngineError>;
}

/// Handle used when no knowledge store could be opened
pub struct UnavailableKnowledgeStore {
    reason: String,
}

impl UnavailableKnowledgeStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl KnowledgeStore for UnavailableKnowledgeStore {
    fn is_ready(&self) -> bool {
        false
    }

    async fn search(&self, _query: &str, _limit: usize) -> Result<Vec<Clause>, EngineError> {
        Err(EngineError::CollaboratorUnavailable(format!(
            "knowledge store: {}",
            self.reason
        )))
    }
}

/// Split a document into clause-sized paragraphs.
///
/// Blank lines separate paragraphs. A document without blank lines is split
/// per line instead, so line-per-rule documents still index one rule each.
pub fn split_paragraphs(content: &str) -> Vec<String> {
    let normalized = content.replace("\r\n", "\n");

    let mut paragraphs: Vec<String> = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n"));
                current.clear();
            }
        } else {
            current.push(line.trim());
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n"));
    }

    if paragraphs.len() == 1 && paragraphs[0].contains('\n') {
        return paragraphs[0].lines().map(str::to_string).collect();
    }

    paragraphs
}

/// Build an FTS5 MATCH expression for a free-text query.
///
/// Latin words of three or more characters are matched as quoted phrases.
/// CJK runs are cut into overlapping three-character windows, the unit the
/// trigram tokenizer indexes. Returns `None` when nothing is searchable.
pub fn fts_query(query: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();

    for run in token_runs(query) {
        let chars: Vec<char> = run.chars().collect();
        if chars.len() < 3 {
            continue;
        }
        if chars.iter().any(|c| is_cjk(*c)) {
            for window in chars.windows(3) {
                terms.push(window.iter().collect());
            }
        } else {
            terms.push(run);
        }
    }

    terms.dedup();
    if terms.is_empty() {
        return None;
    }

    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

/// Short terms the trigram index cannot match; searched with LIKE instead
pub fn short_terms(query: &str) -> Vec<String> {
    token_runs(query)
        .into_iter()
        .filter(|run| {
            let n = run.chars().count();
            (1..3).contains(&n) && run.chars().any(is_cjk)
        })
        .collect()
}

/// Split on whitespace and punctuation, keeping letters, digits and CJK
fn token_runs(query: &str) -> Vec<String> {
    query
        .split(|c: char| !(c.is_alphanumeric() || is_cjk(c)))
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0xF900..=0xFAFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_on_blank_lines() {
        let doc = "Rule one\ncontinues here\n\nRule two\n\n\nRule three";
        let paragraphs = split_paragraphs(doc);
        assert_eq!(
            paragraphs,
            vec!["Rule one\ncontinues here", "Rule two", "Rule three"]
        );
    }

    #[test]
    fn test_split_line_per_rule_document() {
        let doc = "第一条 禁止携带易燃易爆物品\n第二条 宠物须装笼\n第三条 自行车不得进站";
        assert_eq!(split_paragraphs(doc).len(), 3);
    }

    #[test]
    fn test_fts_query_latin_words() {
        assert_eq!(
            fts_query("Can I bring a bike?").as_deref(),
            Some("\"can\" OR \"bring\" OR \"bike\"")
        );
    }

    #[test]
    fn test_fts_query_cjk_windows() {
        assert_eq!(
            fts_query("携带宠物").as_deref(),
            Some("\"携带宠\" OR \"带宠物\"")
        );
    }

    #[test]
    fn test_fts_query_escapes_and_empties() {
        assert!(fts_query("a ? !").is_none());
        assert!(fts_query("").is_none());
        let q = fts_query("luggage\"size").unwrap();
        assert!(q.contains("\"luggage\""));
    }

    #[test]
    fn test_short_terms_only_cjk() {
        assert_eq!(short_terms("宠物 ok 携带"), vec!["宠物", "携带"]);
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = UnavailableKnowledgeStore::new("database locked");
        assert!(!store.is_ready());
        assert!(matches!(
            store.search("pets", 3).await,
            Err(EngineError::CollaboratorUnavailable(_))
        ));
    }
}
