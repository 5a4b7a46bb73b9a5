//! Bounded tool loop
//!
//! The model is called with the worker's instructions, earlier turns and the
//! task's isolated input. A tool call is executed and its result fed back;
//! a plain-text reply ends the loop and becomes the task result.
//!
//! # Limits
//!
//! - At most `max_iterations` model calls per task
//! - A tool that reported *not found* is never called again for the task
//!
//! Every exit path completes the task: model failures and the iteration
//! cap produce a degraded textual result instead of an error.

use super::WorkerProfile;
use crate::llm::router::LLMRouter;
use crate::llm::{LLMResponse, Message, ToolCall};
use crate::message_bus::{Event, MessageBus};
use crate::tools::ToolRegistry;
use async_trait::async_trait;
use sdk::history::HistoryEntry;
use sdk::task::{Task, TaskType};
use sdk::types::{ToolArgs, ToolOutcome};
use sdk::worker::{Worker, WorkerOutput};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

const DEFAULT_MAX_ITERATIONS: usize = 6;
const DEFAULT_HISTORY_WINDOW: usize = 20;

pub struct ToolLoopWorker {
    profile: WorkerProfile,
    router: Arc<LLMRouter>,
    tools: ToolRegistry,
    bus: Option<Arc<MessageBus>>,
    max_iterations: usize,
    history_window: usize,
}

/// Per-task loop state
struct LoopState {
    messages: Vec<Message>,
    side_messages: Vec<HistoryEntry>,
    /// Tools that reported nothing found for this task
    exhausted: HashSet<String>,
    /// Text of every successful lookup, kept for degraded results
    found: Vec<String>,
}

impl ToolLoopWorker {
    pub fn new(profile: WorkerProfile, router: Arc<LLMRouter>, tools: ToolRegistry) -> Self {
        Self {
            profile,
            router,
            tools,
            bus: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            history_window: DEFAULT_HISTORY_WINDOW,
        }
    }

    pub fn with_limits(mut self, max_iterations: usize, history_window: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self.history_window = history_window;
        self
    }

    pub fn with_bus(mut self, bus: Arc<MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    fn system_prompt(&self) -> String {
        let tools = self.tools.prompt_section();
        if tools.is_empty() {
            self.profile.instructions.to_string()
        } else {
            format!("{}\n\n{}", self.profile.instructions, tools)
        }
    }

    /// Result used when the loop cannot finish normally. Facts already
    /// looked up are kept verbatim.
    fn degraded(reason: &str, found: &[String]) -> String {
        if found.is_empty() {
            reason.to_string()
        } else {
            format!("{}\n\n{}", reason, found.join("\n\n"))
        }
    }

    async fn run_tool(&self, task: &Task, call: &ToolCall, state: &mut LoopState) {
        let args = ToolArgs::from_value(call.name.as_str(), call.arguments_value());
        let call_text = serde_json::json!({
            "function": &call.name,
            "arguments": call.arguments_value(),
        })
        .to_string();

        state
            .side_messages
            .push(HistoryEntry::intermediate(self.profile.name, &call_text));

        let outcome = self.tools.dispatch(&args).await;
        debug!(
            "Task {} tool {} -> {}",
            task.id(),
            call.name,
            outcome.label()
        );

        if let Some(bus) = &self.bus {
            bus.publish(Event::ToolCalled {
                task_id: task.id().clone(),
                tool: call.name.clone(),
                args: call.arguments_value(),
                outcome: outcome.label().to_string(),
            })
            .await;
        }

        match &outcome {
            ToolOutcome::Found(text) => state.found.push(text.clone()),
            ToolOutcome::NotFound(_) => {
                state.exhausted.insert(call.name.clone());
            }
            ToolOutcome::Failed(_) => {}
        }

        state
            .side_messages
            .push(HistoryEntry::tool(self.profile.name, outcome.text()));

        // Ollama requires user -> assistant -> tool ordering
        state.messages.push(Message::assistant(call_text));
        state
            .messages
            .push(Message::tool_result(outcome.text(), &call.id));
    }
}

#[async_trait]
impl Worker for ToolLoopWorker {
    fn task_type(&self) -> TaskType {
        self.profile.task_type
    }

    async fn handle(&self, task: Task, history: &[HistoryEntry]) -> WorkerOutput {
        let mut messages = vec![Message::system(self.system_prompt())];
        messages.extend(Message::from_history(history, self.history_window));
        messages.push(Message::user(task.input_content()));

        let mut state = LoopState {
            messages,
            side_messages: Vec::new(),
            exhausted: HashSet::new(),
            found: Vec::new(),
        };

        for iteration in 1..=self.max_iterations {
            debug!(
                "Task {} iteration {}/{}",
                task.id(),
                iteration,
                self.max_iterations
            );

            let (response, provider) = match self.router.call(&state.messages).await {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("{} could not reach a model: {}", self.profile.name, e);
                    let result = Self::degraded(
                        "The assistant service is temporarily unavailable, so this part of the \
                         request could not be answered right now.",
                        &state.found,
                    );
                    return WorkerOutput::new(task.complete(result))
                        .with_side_messages(state.side_messages);
                }
            };

            match response {
                LLMResponse::FinalAnswer(answer) => {
                    info!(
                        "Task {} answered by {} via {} after {} iterations",
                        task.id(),
                        self.profile.name,
                        provider,
                        iteration
                    );
                    let content = answer.content.trim();
                    let result = if content.is_empty() {
                        Self::degraded("No answer could be produced for this request.", &state.found)
                    } else {
                        content.to_string()
                    };
                    return WorkerOutput::new(task.complete(result))
                        .with_side_messages(state.side_messages);
                }
                LLMResponse::ToolCall(call) => {
                    if state.exhausted.contains(&call.name) {
                        info!(
                            "Task {} asked for {} again after it found nothing; stopping",
                            task.id(),
                            call.name
                        );
                        let result = format!(
                            "Nothing was found for: {}",
                            task.input_content()
                        );
                        return WorkerOutput::new(task.complete(result))
                            .with_side_messages(state.side_messages);
                    }

                    self.run_tool(&task, &call, &mut state).await;
                }
            }
        }

        warn!(
            "Task {} hit the tool iteration cap ({})",
            task.id(),
            self.max_iterations
        );
        let result = Self::degraded(
            "This part of the request could not be completed within the allowed number of steps.",
            &state.found,
        );
        WorkerOutput::new(task.complete(result)).with_side_messages(state.side_messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LLMConfig;
    use crate::llm::{LLMError, LLMProvider};
    use async_trait::async_trait;
    use sdk::history::EntryKind;
    use std::sync::Mutex;

    /// Replays scripted responses and records every request
    struct Scripted {
        replies: Mutex<Vec<String>>,
        seen: Arc<Mutex<Vec<Vec<Message>>>>,
    }

    #[async_trait]
    impl LLMProvider for Scripted {
        fn name(&self) -> &str {
            "ollama"
        }

        fn is_local(&self) -> bool {
            true
        }

        fn estimated_cost(&self, _tokens: usize) -> f64 {
            0.0
        }

        async fn generate(&self, messages: &[Message]) -> crate::llm::Result<LLMResponse> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(LLMError::ProviderUnavailable("script exhausted".into()));
            }
            Ok(LLMResponse::from_text(replies.remove(0)))
        }
    }

    fn router(replies: &[&str]) -> (Arc<LLMRouter>, Arc<Mutex<Vec<Vec<Message>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let provider = Scripted {
            replies: Mutex::new(replies.iter().map(|s| s.to_string()).collect()),
            seen: seen.clone(),
        };
        let router = LLMRouter::new(vec![Box::new(provider)], Arc::new(LLMConfig::default()));
        (Arc::new(router), seen)
    }

    struct CountingTool {
        outcome: ToolOutcome,
        calls: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl crate::tools::Tool for CountingTool {
        fn name(&self) -> &'static str {
            "lookup_policy"
        }

        fn description(&self) -> &'static str {
            "test lookup"
        }

        fn arguments(&self) -> &'static str {
            r#"{"query": "q"}"#
        }

        async fn invoke(&self, _args: &ToolArgs) -> ToolOutcome {
            *self.calls.lock().unwrap() += 1;
            self.outcome.clone()
        }
    }

    fn general_worker(
        router: Arc<LLMRouter>,
        outcome: ToolOutcome,
    ) -> (ToolLoopWorker, Arc<Mutex<usize>>) {
        let calls = Arc::new(Mutex::new(0));
        let mut tools = ToolRegistry::empty();
        tools.register(Arc::new(CountingTool {
            outcome,
            calls: calls.clone(),
        }));
        let worker = ToolLoopWorker::new(WorkerProfile::for_type(TaskType::General), router, tools);
        (worker, calls)
    }

    const LOOKUP: &str = r#"{"function": "lookup_policy", "arguments": {"query": "pets"}}"#;

    #[tokio::test]
    async fn test_tool_then_answer() {
        let (router, seen) = router(&[LOOKUP, "Pets must be caged [Clause 1]."]);
        let (worker, calls) = general_worker(
            router,
            ToolOutcome::Found("[Clause 1] (Source: rules.txt) Pets must be caged.".into()),
        );

        let task = Task::new(TaskType::General, "pets", "can I bring my cat");
        let output = worker.handle(task, &[]).await;

        assert!(output.task.is_done());
        assert_eq!(output.task.result(), Some("Pets must be caged [Clause 1]."));
        assert_eq!(*calls.lock().unwrap(), 1);

        // call + result, both intermediate and authored by the worker
        assert_eq!(output.side_messages.len(), 2);
        assert!(output
            .side_messages
            .iter()
            .all(|m| m.kind == EntryKind::Intermediate
                && m.author.as_deref() == Some("general_worker")));

        // the second model call saw the tool result
        let requests = seen.lock().unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1]
            .iter()
            .any(|m| m.content.contains("Pets must be caged.")));
    }

    #[tokio::test]
    async fn test_not_found_tool_is_never_retried() {
        let (router, _) = router(&[LOOKUP, LOOKUP, "should not be reached"]);
        let (worker, calls) = general_worker(
            router,
            ToolOutcome::NotFound("no matching regulation".into()),
        );

        let task = Task::new(TaskType::General, "parking", "is there parking at 龙朔");
        let output = worker.handle(task, &[]).await;

        assert_eq!(*calls.lock().unwrap(), 1);
        let result = output.task.result().unwrap();
        assert!(result.contains("Nothing was found"));
        assert!(result.contains("is there parking at 龙朔"));
    }

    #[tokio::test]
    async fn test_model_failure_degrades() {
        let (router, _) = router(&[]);
        let (worker, _) = general_worker(router, ToolOutcome::Found(String::new()));

        let task = Task::new(TaskType::General, "hi", "hello");
        let output = worker.handle(task, &[]).await;

        assert!(output.task.is_done());
        assert!(output.task.result().unwrap().contains("temporarily unavailable"));
    }

    #[tokio::test]
    async fn test_iteration_cap_keeps_found_facts() {
        let other = r#"{"function": "lookup_policy", "arguments": {"query": "bikes"}}"#;
        let (router, _) = router(&[LOOKUP, other, LOOKUP]);
        let (worker, calls) = general_worker(
            router,
            ToolOutcome::Found("[Clause 2] (Source: rules.txt) Folding bikes allowed.".into()),
        );
        let worker = worker.with_limits(2, 20);

        let output = worker
            .handle(Task::new(TaskType::General, "bikes", "bikes?"), &[])
            .await;

        assert_eq!(*calls.lock().unwrap(), 2);
        let result = output.task.result().unwrap();
        assert!(result.contains("allowed number of steps"));
        assert!(result.contains("[Clause 2] (Source: rules.txt)"));
    }

    #[tokio::test]
    async fn test_prompt_uses_isolated_input_and_prior_turns() {
        let (router, seen) = router(&["Hello!"]);
        let (worker, _) = general_worker(router, ToolOutcome::Found(String::new()));

        let history = vec![
            HistoryEntry::user("earlier question"),
            HistoryEntry::intermediate("ticket_worker", "trace"),
            HistoryEntry::reply("earlier answer"),
        ];
        let task = Task::new(TaskType::General, "greeting", "hi there");
        worker.handle(task, &history).await;

        let requests = seen.lock().unwrap();
        let first = &requests[0];
        assert_eq!(first.len(), 4);
        assert_eq!(first.last().unwrap().content, "hi there");
        assert!(!first.iter().any(|m| m.content == "trace"));
    }
}
