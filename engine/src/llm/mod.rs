//! LLM Provider Abstraction Layer
//!
//! This module provides a common interface for the model-inference
//! collaborator (Ollama, OpenAI-compatible endpoints). The LLMProvider trait
//! defines the contract that all providers must implement, enabling the
//! router to fail over between them transparently.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use sdk::history::{HistoryEntry, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

pub mod ollama;
pub mod openai;
pub mod router;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Incremental text output of a streaming generation
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unexpected tool call: {0}")]
    UnexpectedToolCall(String),
}

/// Message in a model conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: MessageRole,

    pub content: String,

    /// Tool call this message answers, for tool result messages
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    /// Convert earlier-turn history into model context.
    ///
    /// Intermediate worker traces are skipped; only what the user said and
    /// what they were told is carried forward.
    pub fn from_history(entries: &[HistoryEntry], window: usize) -> Vec<Message> {
        let visible: Vec<&HistoryEntry> = entries.iter().filter(|e| !e.is_intermediate()).collect();
        let start = visible.len().saturating_sub(window);
        visible[start..]
            .iter()
            .map(|e| match e.role {
                Role::User => Message::user(&e.content),
                Role::Assistant | Role::Tool => Message::assistant(&e.content),
            })
            .collect()
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
            MessageRole::Tool => write!(f, "tool"),
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LLMResponse {
    /// The model wants to call a tool
    ToolCall(ToolCall),

    /// The model produced its answer
    FinalAnswer(FinalAnswer),
}

impl LLMResponse {
    /// Classify raw model text as a tool call or a final answer
    pub fn from_text(content: impl Into<String>) -> Self {
        let content = content.into();
        match parse_tool_calls(&content) {
            Some(tool_call) => LLMResponse::ToolCall(tool_call),
            None => LLMResponse::FinalAnswer(FinalAnswer::new(content)),
        }
    }
}

/// Tool call request from the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,

    pub name: String,

    /// Arguments as a JSON string
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }

    /// Arguments parsed as JSON; malformed arguments become `Null`
    pub fn arguments_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalAnswer {
    pub content: String,
}

impl FinalAnswer {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// LLM Provider trait that all providers must implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Returns the name of the provider (e.g., "ollama", "openai")
    fn name(&self) -> &str;

    /// Returns true if this is a local provider (e.g., Ollama)
    fn is_local(&self) -> bool;

    /// Returns the estimated cost for `tokens` tokens in USD.
    /// Local providers should return 0.0
    fn estimated_cost(&self, tokens: usize) -> f64;

    /// Generate a response (tool call or final answer)
    async fn generate(&self, messages: &[Message]) -> Result<LLMResponse>;

    /// Generate with the provider's constrained JSON output mode.
    ///
    /// The default runs a normal generation and rejects tool calls.
    async fn generate_json(&self, messages: &[Message]) -> Result<String> {
        match self.generate(messages).await? {
            LLMResponse::FinalAnswer(answer) => Ok(answer.content),
            LLMResponse::ToolCall(call) => Err(LLMError::UnexpectedToolCall(call.name)),
        }
    }

    /// Stream the answer text.
    ///
    /// The default yields the whole answer as a single chunk.
    async fn generate_stream(&self, messages: &[Message]) -> Result<TextStream> {
        let text = match self.generate(messages).await? {
            LLMResponse::FinalAnswer(answer) => answer.content,
            LLMResponse::ToolCall(call) => return Err(LLMError::UnexpectedToolCall(call.name)),
        };
        Ok(Box::pin(stream::once(async move { Ok(text) })))
    }

    /// Check if the provider is currently healthy and available
    async fn check_health(&self) -> bool {
        true
    }
}

/// Split an HTTP byte stream into trimmed, non-empty text lines.
///
/// Used for Ollama's NDJSON and OpenAI-style SSE streams. A trailing line
/// without a newline is still emitted when the body ends.
pub(crate) fn line_stream<S, B>(bytes: S) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = (Box::pin(bytes), Vec::<u8>::new(), false);
    stream::unfold(state, |(mut bytes, mut buf, mut done)| async move {
        loop {
            if let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                let raw: Vec<u8> = buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                return Some((Ok(line), (bytes, buf, done)));
            }

            if done {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                buf.clear();
                if line.is_empty() {
                    return None;
                }
                return Some((Ok(line), (bytes, buf, done)));
            }

            match bytes.next().await {
                Some(Ok(chunk)) => buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((
                        Err(LLMError::NetworkError(e.to_string())),
                        (bytes, buf, true),
                    ));
                }
                None => done = true,
            }
        }
    })
}

/// Parse a tool call out of model text.
///
/// Handles:
/// 1. Raw JSON: `{"function": "...", "arguments": {...}}`
/// 2. Fenced JSON (with or without trailing text)
/// 3. JSON embedded in prose, found by scanning for `{"function"`
pub fn parse_tool_calls(content: &str) -> Option<ToolCall> {
    let trimmed = content.trim();

    if let Some(tc) = try_parse_function_json(trimmed) {
        return Some(tc);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(tc) = try_parse_function_json(inner.trim()) {
            return Some(tc);
        }
    }

    if let Some(pos) = trimmed.find("{\"function\"") {
        if let Some(json_str) = extract_balanced_json(&trimmed[pos..]) {
            if let Some(tc) = try_parse_function_json(json_str) {
                return Some(tc);
            }
        }
    }

    None
}

/// Try to parse `{"function": "...", "arguments": {...}}` as a tool call.
fn try_parse_function_json(s: &str) -> Option<ToolCall> {
    let json: serde_json::Value = serde_json::from_str(s).ok()?;
    let function = json.get("function")?.as_str()?;
    let arguments = json
        .get("arguments")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));
    Some(ToolCall::new(
        format!("call_{}", uuid::Uuid::new_v4()),
        function,
        arguments.to_string(),
    ))
}

/// Extract the body of the first markdown code fence in the text.
pub(crate) fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // skip the language tag line
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object or array starting at position 0 of `s`.
///
/// Counts bracket depth, respecting string literals.
pub(crate) fn extract_balanced_json(s: &str) -> Option<&str> {
    let (open, close) = match s.chars().next()? {
        '{' => ('{', '}'),
        '[' => ('[', ']'),
        _ => return None,
    };
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.tool_call_id, None);

        let tool_msg = Message::tool_result("result", "call_123");
        assert_eq!(tool_msg.role, MessageRole::Tool);
        assert_eq!(tool_msg.tool_call_id, Some("call_123".to_string()));
    }

    #[test]
    fn test_from_history_skips_intermediate_and_windows() {
        let entries = vec![
            HistoryEntry::user("one"),
            HistoryEntry::intermediate("ticket", "calling query_fare"),
            HistoryEntry::reply("two"),
            HistoryEntry::user("three"),
        ];
        let all = Message::from_history(&entries, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[1].role, MessageRole::Assistant);

        let last_two = Message::from_history(&entries, 2);
        assert_eq!(last_two.len(), 2);
        assert_eq!(last_two[0].content, "two");
    }

    #[test]
    fn test_parse_tool_calls_json_format() {
        let content = r#"{"function": "query_fare", "arguments": {"start_station": "A"}}"#;
        let tool_call = parse_tool_calls(content).unwrap();
        assert_eq!(tool_call.name, "query_fare");
        assert_eq!(tool_call.arguments_value()["start_station"], "A");
    }

    #[test]
    fn test_parse_tool_calls_fenced_with_prose() {
        let content = "Let me look that up.\n```json\n{\"function\": \"lookup_policy\", \"arguments\": {\"query\": \"pets\"}}\n```\nOne moment.";
        let tool_call = parse_tool_calls(content).unwrap();
        assert_eq!(tool_call.name, "lookup_policy");
    }

    #[test]
    fn test_parse_tool_calls_embedded() {
        let content = r#"Sure: {"function": "web_search", "arguments": {"query": "line 1 {delay}"}} thanks"#;
        let tool_call = parse_tool_calls(content).unwrap();
        assert_eq!(tool_call.name, "web_search");
        assert_eq!(tool_call.arguments_value()["query"], "line 1 {delay}");
    }

    #[test]
    fn test_parse_tool_calls_no_match() {
        assert!(parse_tool_calls("The fare is 4 yuan.").is_none());
        assert!(parse_tool_calls(r#"{"tasks": []}"#).is_none());
    }

    #[test]
    fn test_response_from_text() {
        assert!(matches!(
            LLMResponse::from_text("hello"),
            LLMResponse::FinalAnswer(_)
        ));
        assert!(matches!(
            LLMResponse::from_text(r#"{"function": "x", "arguments": {}}"#),
            LLMResponse::ToolCall(_)
        ));
    }

    #[test]
    fn test_extract_balanced_array() {
        let s = r#"[{"a": "]"}, {"b": 1}] trailing"#;
        assert_eq!(extract_balanced_json(s), Some(r#"[{"a": "]"}, {"b": 1}]"#));
    }

    #[tokio::test]
    async fn test_line_stream_reassembles_split_lines() {
        let chunks: Vec<reqwest::Result<Vec<u8>>> = vec![
            Ok(b"{\"a\":".to_vec()),
            Ok(b"1}\n\n{\"b\"".to_vec()),
            Ok(b":2}".to_vec()),
        ];
        let lines: Vec<String> = line_stream(stream::iter(chunks))
            .map(|l| l.unwrap())
            .collect()
            .await;
        assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}"]);
    }
}
