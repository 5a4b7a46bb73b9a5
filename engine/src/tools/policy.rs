//! `lookup_policy`: search the station rules and ticketing regulations

use super::Tool;
use crate::knowledge::{Clause, KnowledgeStore};
use async_trait::async_trait;
use sdk::types::{ToolArgs, ToolOutcome};
use std::sync::Arc;

pub struct PolicyLookupTool {
    store: Arc<dyn KnowledgeStore>,
    top_k: usize,
}

impl PolicyLookupTool {
    pub fn new(store: Arc<dyn KnowledgeStore>, top_k: usize) -> Self {
        Self { store, top_k }
    }
}

/// Render clauses with their citation markers, one paragraph each
pub fn format_clauses(clauses: &[Clause]) -> String {
    clauses
        .iter()
        .enumerate()
        .map(|(i, clause)| {
            format!(
                "[Clause {}] (Source: {}) {}",
                i + 1,
                clause.source,
                clause.content.replace('\n', " ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[async_trait]
impl Tool for PolicyLookupTool {
    fn name(&self) -> &'static str {
        "lookup_policy"
    }

    fn description(&self) -> &'static str {
        "Search the written passenger rules, prohibited items and ticketing regulations. \
         Use short keyword queries (\"folding bike\", not a full question)."
    }

    fn arguments(&self) -> &'static str {
        r#"{"query": "keywords"}"#
    }

    async fn invoke(&self, args: &ToolArgs) -> ToolOutcome {
        let query = match args.param_str("query") {
            Ok(q) => q,
            Err(e) => return e.into(),
        };

        if !self.store.is_ready() {
            return ToolOutcome::Failed(
                "policy database unavailable. Answer from general knowledge and say the written rules could not be checked."
                    .to_string(),
            );
        }

        match self.store.search(&query, self.top_k).await {
            Ok(clauses) if clauses.is_empty() => ToolOutcome::NotFound(
                "The policy database has no matching regulation. Answer from general knowledge and do not search again."
                    .to_string(),
            ),
            Ok(clauses) => ToolOutcome::Found(format_clauses(&clauses)),
            Err(e) => {
                tracing::warn!("Policy lookup failed: {}", e);
                ToolOutcome::Failed(format!("policy database unavailable ({})", e))
            }
        }
    }
}
