//! Conductor Planner
//!
//! Turns one user utterance into typed tasks using the model's JSON output
//! mode. Each task receives only its own slice of the utterance.
//!
//! Planning never fails from the caller's point of view: a model error, a
//! malformed plan or an empty plan all produce the single `general`
//! fallback task carrying the whole utterance.

use crate::llm::router::LLMRouter;
use crate::llm::{extract_balanced_json, extract_fenced_json, Message};
use sdk::errors::EngineError;
use sdk::history::HistoryEntry;
use sdk::task::{Task, TaskType};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Connector words stripped from the ends of an isolated input
const CONNECTORS: [&str; 9] = [
    "and", "also", "plus", "then", "并且", "而且", "还有", "另外", "以及",
];

pub struct Planner {
    router: Arc<LLMRouter>,
    history_window: usize,
}

/// Planner output
#[derive(Debug, Clone)]
pub struct Plan {
    pub tasks: Vec<Task>,
    /// True when the single general fallback task was used
    pub fallback: bool,
}

/// One validated plan entry, before it becomes a [`Task`]
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedEntry {
    pub task_type: TaskType,
    pub description: String,
    pub input_content: String,
}

impl Planner {
    pub fn new(router: Arc<LLMRouter>, history_window: usize) -> Self {
        Self {
            router,
            history_window,
        }
    }

    /// Decompose `utterance` into tasks. `history` must exclude the
    /// in-flight turn.
    pub async fn plan(&self, utterance: &str, history: &[HistoryEntry]) -> Plan {
        let mut messages = vec![Message::system(Self::system_prompt())];
        messages.extend(Message::from_history(history, self.history_window));
        messages.push(Message::user(utterance));

        let content = match self.router.call_json(&messages).await {
            Ok((content, provider)) => {
                debug!("Plan generated by {}", provider);
                content
            }
            Err(e) => {
                warn!("Planning call failed, using fallback task: {}", e);
                return Self::fallback_plan(utterance);
            }
        };

        let entries = match parse_plan(&content) {
            Ok(entries) => isolate(entries),
            Err(e) => {
                warn!("{}; using fallback task", e);
                return Self::fallback_plan(utterance);
            }
        };

        if entries.is_empty() {
            warn!("Plan contained no usable tasks, using fallback task");
            return Self::fallback_plan(utterance);
        }

        let tasks: Vec<Task> = entries
            .into_iter()
            .map(|e| Task::new(e.task_type, e.description, e.input_content))
            .collect();

        info!(
            "Plan created: {} tasks -> {:?}",
            tasks.len(),
            tasks.iter().map(|t| t.task_type().as_str()).collect::<Vec<_>>()
        );

        Plan {
            tasks,
            fallback: false,
        }
    }

    /// The single general task covering the whole utterance
    pub fn fallback_task(utterance: &str) -> Task {
        Task::new(TaskType::FALLBACK, "general request", utterance)
    }

    fn fallback_plan(utterance: &str) -> Plan {
        Plan {
            tasks: vec![Self::fallback_task(utterance)],
            fallback: true,
        }
    }

    fn system_prompt() -> String {
        let handlers = TaskType::ALL
            .iter()
            .map(|t| format!("- {}: {}", t.as_str(), t.capability()))
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are the task planner of a metro customer service desk. Split the user's latest \
             message into independent tasks, one per request it contains.\n\n\
             Handlers:\n{handlers}\n\n\
             Rules:\n\
             1. Greetings, small talk and questions about rules or policies go to general. When \
             unsure, use general.\n\
             2. Use complaint only when the user clearly reports a problem or is unhappy.\n\
             3. Use ticket only for concrete fare, timetable or ticketing questions.\n\
             4. input_content must contain ONLY the words of that one request, with nothing that \
             belongs to another task.\n\
             5. Two requests for the same handler are two separate tasks.\n\n\
             Output ONLY a JSON object, no markdown, no explanation:\n\
             {{\"tasks\": [{{\"task_type\": \"complaint\", \"description\": \"broken escalator\", \
             \"input_content\": \"the escalator at station A is broken\"}}, \
             {{\"task_type\": \"ticket\", \"description\": \"fare query\", \
             \"input_content\": \"what's the fare from A to B\"}}]}}"
        )
    }
}

/// Parse model output into validated plan entries.
///
/// Accepts `{"tasks": [...]}` or a bare array, optionally inside a code fence
/// or surrounded by prose. Entries with an unknown `task_type` or an empty
/// `input_content` are dropped.
pub fn parse_plan(content: &str) -> Result<Vec<PlannedEntry>, EngineError> {
    let value = find_json(content)
        .ok_or_else(|| EngineError::PlanningFailed("no JSON plan in model output".to_string()))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("tasks") {
            Some(Value::Array(items)) => items,
            _ => {
                return Err(EngineError::PlanningFailed(
                    "plan object has no tasks array".to_string(),
                ))
            }
        },
        _ => {
            return Err(EngineError::PlanningFailed(
                "plan is not an object or array".to_string(),
            ))
        }
    };

    Ok(items.iter().filter_map(parse_entry).collect())
}

fn parse_entry(item: &Value) -> Option<PlannedEntry> {
    let field = |names: &[&str]| {
        names
            .iter()
            .find_map(|n| item.get(*n).and_then(Value::as_str))
            .map(|s| s.trim().to_string())
    };

    let tag = field(&["task_type", "type", "agent"])?;
    let task_type = match tag.parse::<TaskType>() {
        Ok(t) => t,
        Err(e) => {
            warn!("Dropping plan entry: {}", e);
            return None;
        }
    };

    let input_content = field(&["input_content", "input", "content"]).unwrap_or_default();
    if input_content.is_empty() {
        warn!("Dropping {} plan entry with empty input_content", task_type);
        return None;
    }

    let description = field(&["description"])
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| format!("{} request", task_type));

    Some(PlannedEntry {
        task_type,
        description,
        input_content,
    })
}

fn find_json(content: &str) -> Option<Value> {
    let trimmed = content.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }
    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Ok(value) = serde_json::from_str::<Value>(inner.trim()) {
            return Some(value);
        }
    }
    let start = trimmed.find(|c: char| c == '{' || c == '[')?;
    let json = extract_balanced_json(&trimmed[start..])?;
    serde_json::from_str(json).ok()
}

/// Enforce disjoint inputs across sibling entries.
///
/// A sibling's input found verbatim inside an entry's input is cut out.
/// Entries left empty, and exact repeats of an earlier input, are dropped.
pub fn isolate(entries: Vec<PlannedEntry>) -> Vec<PlannedEntry> {
    let originals: Vec<String> = entries.iter().map(|e| e.input_content.clone()).collect();

    let mut kept = Vec::with_capacity(entries.len());
    for (i, mut entry) in entries.into_iter().enumerate() {
        let own = &originals[i];
        if originals[..i].contains(own) {
            warn!("Dropping duplicate plan entry '{}'", own);
            continue;
        }

        let mut content = own.clone();
        let mut cut = false;
        for (j, other) in originals.iter().enumerate() {
            if j != i && other != own && content.contains(other.as_str()) {
                content = content.replace(other.as_str(), " ");
                cut = true;
            }
        }

        let content = if cut { tidy(&content) } else { content };
        if content.is_empty() {
            warn!("Dropping plan entry fully covered by its siblings: '{}'", own);
            continue;
        }
        if &content != own {
            debug!("Isolated plan input '{}' -> '{}'", own, content);
        }

        entry.input_content = content;
        kept.push(entry);
    }
    kept
}

/// Clean up what is left after cutting out a sibling's span: collapse
/// whitespace and strip punctuation and connector words at the ends
fn tidy(text: &str) -> String {
    let is_edge = |c: char| c.is_whitespace() || c.is_ascii_punctuation() || "，。、；：！？".contains(c);

    let mut s = text.split_whitespace().collect::<Vec<_>>().join(" ");
    loop {
        let before = s.len();
        s = s.trim_matches(is_edge).to_string();
        for connector in CONNECTORS {
            if let Some(rest) = strip_word_prefix(&s, connector) {
                s = rest.to_string();
            }
            if let Some(rest) = strip_word_suffix(&s, connector) {
                s = rest.to_string();
            }
        }
        if s.len() == before {
            return s;
        }
    }
}

fn is_cjk_word(word: &str) -> bool {
    !word.is_ascii()
}

fn strip_word_prefix<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    let rest = strip_prefix_ignore_case(s, word)?;
    if rest.is_empty() || is_cjk_word(word) || rest.starts_with(|c: char| !c.is_alphanumeric()) {
        Some(rest)
    } else {
        None
    }
}

fn strip_word_suffix<'a>(s: &'a str, word: &str) -> Option<&'a str> {
    if s.len() < word.len() || !s.is_char_boundary(s.len() - word.len()) {
        return None;
    }
    let (head, tail) = s.split_at(s.len() - word.len());
    if !tail.eq_ignore_ascii_case(word) {
        return None;
    }
    if head.is_empty() || is_cjk_word(word) || head.ends_with(|c: char| !c.is_alphanumeric()) {
        Some(head)
    } else {
        None
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() || !s.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}
