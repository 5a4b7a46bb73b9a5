//! Aggregator
//!
//! Produces the single user-facing reply for a turn from every task on the
//! board, streams it onto the message bus and hands back the board reset.
//!
//! Citation markers and factual tokens in task results must survive
//! summarization. When the model's reply drops any of them, the affected
//! results are appended verbatim under a "Details" section.

use crate::llm::router::LLMRouter;
use crate::llm::Message;
use crate::message_bus::{Event, MessageBus};
use futures::StreamExt;
use regex::Regex;
use sdk::board::{Board, BoardUpdate};
use sdk::history::ConversationHistory;
use sdk::task::Task;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Final reply for one turn
#[derive(Debug, Clone)]
pub struct Summary {
    pub reply: String,
    /// Tasks still pending when the turn was summarized
    pub incomplete: usize,
    /// Always [`BoardUpdate::Reset`]
    pub reset: BoardUpdate,
}

pub struct Aggregator {
    router: Arc<LLMRouter>,
    bus: Arc<MessageBus>,
}

impl Aggregator {
    pub fn new(router: Arc<LLMRouter>, bus: Arc<MessageBus>) -> Self {
        Self { router, bus }
    }

    /// Summarize the turn. Called exactly once per turn, after dispatching
    /// has finished.
    pub async fn summarize(
        &self,
        session_id: &str,
        board: &Board,
        history: &ConversationHistory,
    ) -> Summary {
        let done: Vec<&Task> = board.iter().filter(|t| t.is_done()).collect();
        let pending = board.pending();

        let mut reply = if done.is_empty() {
            String::new()
        } else {
            let messages = Self::prompt(&done, &pending, history);
            match self.stream_reply(session_id, &messages).await {
                Some(text) => text,
                None => {
                    let text = fallback_reply(&done);
                    self.publish_chunk(session_id, &text).await;
                    text
                }
            }
        };

        let mut suffix = String::new();

        let results: Vec<&str> = done.iter().filter_map(|t| t.result()).collect();
        let missing = unpreserved_results(&results, &reply);
        if !missing.is_empty() {
            debug!(
                "Reply dropped facts from {} results, appending details",
                missing.len()
            );
            suffix.push_str("\n\nDetails:");
            for result in missing {
                suffix.push_str("\n\n");
                suffix.push_str(result);
            }
        }

        if !pending.is_empty() {
            warn!("{} tasks still pending at summarization", pending.len());
            suffix.push_str(&incomplete_note(&pending));
        }

        if reply.trim().is_empty() && suffix.trim().is_empty() {
            suffix.push_str("Sorry, I could not work out an answer to that request.");
        }

        if !suffix.is_empty() {
            if reply.is_empty() {
                suffix = suffix.trim_start().to_string();
            }
            self.publish_chunk(session_id, &suffix).await;
            reply.push_str(&suffix);
        }

        Summary {
            reply,
            incomplete: pending.len(),
            reset: BoardUpdate::Reset,
        }
    }

    /// Stream the model's reply. `None` when no provider could produce one.
    async fn stream_reply(&self, session_id: &str, messages: &[Message]) -> Option<String> {
        let (mut stream, provider) = match self.router.stream(messages).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Aggregation model unavailable, composing reply locally: {}", e);
                return None;
            }
        };

        let mut reply = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    self.publish_chunk(session_id, &text).await;
                    reply.push_str(&text);
                }
                Err(e) => {
                    warn!("Reply stream from {} broke off: {}", provider, e);
                    break;
                }
            }
        }

        if reply.trim().is_empty() {
            None
        } else {
            Some(reply)
        }
    }

    async fn publish_chunk(&self, session_id: &str, text: &str) {
        self.bus
            .publish(Event::ReplyChunk {
                session_id: session_id.to_string(),
                text: text.to_string(),
            })
            .await;
    }

    fn prompt(done: &[&Task], pending: &[&Task], history: &ConversationHistory) -> Vec<Message> {
        let question = history
            .current_input()
            .map(|e| e.content.as_str())
            .unwrap_or_default();

        let mut results = String::new();
        for (i, task) in done.iter().enumerate() {
            results.push_str(&format!(
                "Result {} ({}):\n{}\n\n",
                i + 1,
                task.description(),
                task.result().unwrap_or_default()
            ));
        }
        for task in pending {
            results.push_str(&format!(
                "Not completed: {} ({})\n\n",
                task.description(),
                task.input_content()
            ));
        }

        let system = format!(
            "You are the customer service manager of a metro operator. Colleagues have handled \
             each part of the passenger's request. Combine their results into one coherent, \
             friendly and well structured reply.\n\n\
             Rules:\n\
             1. Do not mention internal handlers or workers.\n\
             2. Copy every number, time, fare, ticket number and name exactly as written.\n\
             3. Keep every bracketed marker such as [Clause 1] and every (Source: ...) exactly as written.\n\
             4. If a part was not completed, say so plainly.\n\n\
             The passenger asked: \"{}\"\n\n\
             Results:\n{}",
            question,
            results.trim_end()
        );

        vec![
            Message::system(system),
            Message::user("Write the final reply to the passenger."),
        ]
    }
}

/// Deterministic reply built from the task results alone
pub fn fallback_reply(done: &[&Task]) -> String {
    done.iter()
        .filter_map(|t| t.result())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn incomplete_note(pending: &[&Task]) -> String {
    let mut note = String::from("\n\nPart of your request could not be completed:");
    for task in pending {
        note.push_str(&format!(
            "\n- {} (\"{}\")",
            task.description(),
            task.input_content()
        ));
    }
    note
}

static MARKER_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
static FACT_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn find_all<'t>(pattern: &'static OnceLock<Option<Regex>>, source: &str, text: &'t str) -> Vec<&'t str> {
    match pattern.get_or_init(|| Regex::new(source).ok()) {
        Some(re) => re.find_iter(text).map(|m| m.as_str()).collect(),
        None => Vec::new(),
    }
}

/// Citation markers: `[...]`, `【...】` and `(Source: ...)`
pub fn citation_markers(text: &str) -> Vec<&str> {
    find_all(
        &MARKER_PATTERN,
        r"\[[^\[\]\n]{1,80}\]|【[^【】\n]{1,80}】|\(Source: [^()\n]+\)",
        text,
    )
}

/// Numbers, times and ticket-style identifiers
pub fn factual_tokens(text: &str) -> Vec<&str> {
    find_all(
        &FACT_PATTERN,
        r"\b[A-Z]{2,}-[0-9A-Z]{4,}\b|\d+(?:[.:]\d+)*",
        text,
    )
}

/// Results whose markers or factual tokens do not all appear in `reply`.
///
/// Tokens are compared whole, so `4` is not preserved by a reply saying `14`.
pub fn unpreserved_results<'a>(results: &[&'a str], reply: &str) -> Vec<&'a str> {
    let kept: HashSet<&str> = citation_markers(reply)
        .into_iter()
        .chain(factual_tokens(reply))
        .collect();

    results
        .iter()
        .copied()
        .filter(|result| {
            citation_markers(result)
                .into_iter()
                .chain(factual_tokens(result))
                .any(|token| !kept.contains(token))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LLMConfig;
    use crate::llm::{LLMError, LLMProvider, LLMResponse};
    use crate::message_bus::EventType;
    use async_trait::async_trait;
    use sdk::task::TaskType;

    struct Fixed(Option<&'static str>);

    #[async_trait]
    impl LLMProvider for Fixed {
        fn name(&self) -> &str {
            "ollama"
        }

        fn is_local(&self) -> bool {
            true
        }

        fn estimated_cost(&self, _tokens: usize) -> f64 {
            0.0
        }

        async fn generate(&self, _messages: &[Message]) -> crate::llm::Result<LLMResponse> {
            match self.0 {
                Some(text) => Ok(LLMResponse::from_text(text)),
                None => Err(LLMError::ProviderUnavailable("down".into())),
            }
        }
    }

    fn aggregator(reply: Option<&'static str>) -> (Aggregator, Arc<MessageBus>) {
        let router = LLMRouter::new(vec![Box::new(Fixed(reply))], Arc::new(LLMConfig::default()));
        let bus = Arc::new(MessageBus::new());
        (Aggregator::new(Arc::new(router), bus.clone()), bus)
    }

    fn board(tasks: Vec<Task>) -> Board {
        Board::new().apply(BoardUpdate::Tasks(tasks)).unwrap()
    }

    #[test]
    fn test_marker_and_fact_extraction() {
        let text = "[Clause 1] (Source: rules.txt) Pets 【条款 2】 cost 4 yuan at 06:05, ticket CPT-1A2B3C4D";
        assert_eq!(
            citation_markers(text),
            vec!["[Clause 1]", "(Source: rules.txt)", "【条款 2】"]
        );
        let facts = factual_tokens(text);
        assert!(facts.contains(&"4"));
        assert!(facts.contains(&"06:05"));
        assert!(facts.contains(&"CPT-1A2B3C4D"));
    }

    #[tokio::test]
    async fn test_faithful_reply_is_kept() {
        let (aggregator, bus) = aggregator(Some("Good news: the fare is 4 yuan."));
        let mut chunks = bus.subscribe(EventType::ReplyChunk).await;
        let board = board(vec![
            Task::new(TaskType::Ticket, "fare", "fare A to B").complete("The fare from A to B is 4 yuan.")
        ]);

        let summary = aggregator
            .summarize("s", &board, &ConversationHistory::new())
            .await;

        assert_eq!(summary.reply, "Good news: the fare is 4 yuan.");
        assert_eq!(summary.incomplete, 0);
        assert_eq!(summary.reset, BoardUpdate::Reset);
        assert!(matches!(chunks.try_recv(), Ok(Event::ReplyChunk { .. })));
    }

    #[test]
    fn test_altered_figures_are_not_preserved() {
        let fare = "The fare from A to B is 4 yuan.";
        assert_eq!(
            unpreserved_results(&[fare], "The fare from A to B is 14 yuan."),
            vec![fare]
        );

        let times = "Last train from A leaves at 22:30.";
        assert_eq!(
            unpreserved_results(&[times], "Trains run until 2:30, last one at 22:300."),
            vec![times]
        );

        assert!(unpreserved_results(&[fare], "It costs 4 yuan.").is_empty());
    }

    #[tokio::test]
    async fn test_dropped_citation_is_appended() {
        let (aggregator, _) = aggregator(Some("Pets must travel in a carrier."));
        let result = "[Clause 1] (Source: rules.txt) Pets must be caged.";
        let board = board(vec![
            Task::new(TaskType::General, "pets", "pets?").complete(result)
        ]);

        let summary = aggregator
            .summarize("s", &board, &ConversationHistory::new())
            .await;

        assert!(summary.reply.starts_with("Pets must travel in a carrier."));
        assert!(summary.reply.contains("Details:"));
        assert!(summary.reply.contains(result));
    }

    #[tokio::test]
    async fn test_model_unavailable_uses_results() {
        let (aggregator, _) = aggregator(None);
        let board = board(vec![
            Task::new(TaskType::Complaint, "c", "escalator broken")
                .complete("Complaint filed. Ticket number: CPT-0A1B2C3D."),
            Task::new(TaskType::Ticket, "fare", "fare A to B").complete("The fare is 4 yuan."),
        ]);

        let summary = aggregator
            .summarize("s", &board, &ConversationHistory::new())
            .await;

        assert_eq!(
            summary.reply,
            "Complaint filed. Ticket number: CPT-0A1B2C3D.\n\nThe fare is 4 yuan."
        );
    }

    #[tokio::test]
    async fn test_pending_tasks_are_reported() {
        let (aggregator, _) = aggregator(Some("Here is your fare: 4 yuan."));
        let board = board(vec![
            Task::new(TaskType::Ticket, "fare", "fare A to B").complete("4 yuan"),
            Task::new(TaskType::Judge, "news", "why was line 1 late"),
        ]);

        let summary = aggregator
            .summarize("s", &board, &ConversationHistory::new())
            .await;

        assert_eq!(summary.incomplete, 1);
        assert!(summary.reply.contains("could not be completed"));
        assert!(summary.reply.contains("why was line 1 late"));
    }

    #[tokio::test]
    async fn test_all_pending_still_replies() {
        let (aggregator, _) = aggregator(Some("unused"));
        let board = board(vec![Task::new(TaskType::Judge, "news", "line 1 delay")]);

        let summary = aggregator
            .summarize("s", &board, &ConversationHistory::new())
            .await;

        assert!(summary.reply.starts_with("Part of your request could not be completed"));
    }
}
