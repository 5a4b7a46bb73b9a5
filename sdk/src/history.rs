//! Conversation history
//!
//! An append-only, ordered sequence of turn-level messages for one session.
//! Worker tool traces are kept alongside user input and final replies but
//! carry [`EntryKind::Intermediate`] so they can be told apart from the
//! answer the user actually saw.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of characters kept in a session title
pub const TITLE_MAX_CHARS: usize = 20;

/// Who produced a history entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// What a history entry is, independent of who wrote it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// The user's utterance that opened a turn
    UserInput,
    /// Worker-internal trace (tool calls, tool results); never shown verbatim
    Intermediate,
    /// The aggregated reply that closed a turn
    FinalReply,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub kind: EntryKind,
    /// Worker name for intermediate entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            kind: EntryKind::UserInput,
            author: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn reply(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            kind: EntryKind::FinalReply,
            author: None,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// A worker trace message (tool call or model step)
    pub fn intermediate(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            kind: EntryKind::Intermediate,
            author: Some(author.into()),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    /// A tool result fed back inside a worker loop
    pub fn tool(author: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            kind: EntryKind::Intermediate,
            author: Some(author.into()),
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn is_intermediate(&self) -> bool {
        self.kind == EntryKind::Intermediate
    }
}

/// Append-only conversation log for one session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    entries: Vec<HistoryEntry>,
}

impl ConversationHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = HistoryEntry>) {
        self.entries.extend(entries);
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Everything before the in-flight turn, i.e. before the last user input
    pub fn prior_turns(&self) -> &[HistoryEntry] {
        match self
            .entries
            .iter()
            .rposition(|e| e.kind == EntryKind::UserInput)
        {
            Some(last_input) => &self.entries[..last_input],
            None => &self.entries,
        }
    }

    /// The user input that opened the in-flight turn, if any
    pub fn current_input(&self) -> Option<&HistoryEntry> {
        self.entries
            .iter()
            .rev()
            .find(|e| e.kind == EntryKind::UserInput)
    }

    /// User inputs and final replies only, in order
    pub fn transcript(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().filter(|e| !e.is_intermediate())
    }

    /// Derive a session title from the first user message
    pub fn title(&self) -> Option<String> {
        self.entries
            .iter()
            .find(|e| e.kind == EntryKind::UserInput)
            .map(|e| session_title(&e.content))
    }
}

/// First [`TITLE_MAX_CHARS`] characters of `text`, with `...` when truncated
pub fn session_title(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() > TITLE_MAX_CHARS {
        let head: String = trimmed.chars().take(TITLE_MAX_CHARS).collect();
        format!("{}...", head)
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ConversationHistory {
        let mut history = ConversationHistory::new();
        history.append(HistoryEntry::user("hello"));
        history.append(HistoryEntry::reply("hi, how can I help?"));
        history.append(HistoryEntry::user("fare from A to B"));
        history.append(HistoryEntry::intermediate("ticket", "calling query_fare"));
        history
    }

    #[test]
    fn test_prior_turns_excludes_in_flight_turn() {
        let history = sample();
        let prior = history.prior_turns();
        assert_eq!(prior.len(), 2);
        assert_eq!(prior[0].content, "hello");
        assert_eq!(prior[1].kind, EntryKind::FinalReply);
    }

    #[test]
    fn test_prior_turns_without_user_input() {
        let history = ConversationHistory::new();
        assert!(history.prior_turns().is_empty());
    }

    #[test]
    fn test_current_input() {
        let history = sample();
        assert_eq!(history.current_input().unwrap().content, "fare from A to B");
    }

    #[test]
    fn test_transcript_hides_intermediate() {
        let history = sample();
        assert_eq!(history.transcript().count(), 3);
        assert!(history.transcript().all(|e| !e.is_intermediate()));
    }

    #[test]
    fn test_intermediate_entries_are_tagged() {
        let entry = HistoryEntry::tool("general", "[Clause 1] ...");
        assert_eq!(entry.role, Role::Tool);
        assert_eq!(entry.kind, EntryKind::Intermediate);
        assert_eq!(entry.author.as_deref(), Some("general"));
    }

    #[test]
    fn test_title_short_message_kept() {
        assert_eq!(session_title("  hello  "), "hello");
    }

    #[test]
    fn test_title_truncates_by_chars() {
        let text = "杭州东站到武林广场的票价是多少钱呢请帮我查一下谢谢你";
        let title = session_title(text);
        assert!(title.ends_with("..."));
        assert_eq!(title.chars().count(), TITLE_MAX_CHARS + 3);
    }

    #[test]
    fn test_history_title_uses_first_input() {
        assert_eq!(sample().title().as_deref(), Some("hello"));
        assert_eq!(ConversationHistory::new().title(), None);
    }
}
