//! Shared fixtures for the engine integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use sdk::worker::Worker;
use std::sync::{Arc, Mutex};
use switchboard_engine::conductor::Orchestrator;
use switchboard_engine::config::{Config, LLMConfig};
use switchboard_engine::knowledge::KnowledgeStore;
use switchboard_engine::llm::router::LLMRouter;
use switchboard_engine::llm::{LLMError, LLMProvider, LLMResponse, Message, MessageRole};
use switchboard_engine::message_bus::MessageBus;
use switchboard_engine::session::InMemorySessionStore;
use switchboard_engine::tools::ToolRegistry;
use switchboard_engine::workers::WorkerSet;

type Respond = dyn Fn(&[Message]) -> Option<String> + Send + Sync;

/// Model stand-in answering through a closure; `None` simulates an outage.
/// Every request is recorded.
pub struct DeskModel {
    respond: Box<Respond>,
    pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl DeskModel {
    pub fn new(respond: impl Fn(&[Message]) -> Option<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

#[async_trait]
impl LLMProvider for DeskModel {
    fn name(&self) -> &str {
        "ollama"
    }

    fn is_local(&self) -> bool {
        true
    }

    fn estimated_cost(&self, _tokens: usize) -> f64 {
        0.0
    }

    async fn generate(&self, messages: &[Message]) -> switchboard_engine::llm::Result<LLMResponse> {
        self.calls.lock().unwrap().push(messages.to_vec());
        match (self.respond)(messages) {
            Some(text) => Ok(LLMResponse::from_text(text)),
            None => Err(LLMError::ProviderUnavailable("scripted outage".into())),
        }
    }
}

/// System prompt of a request
pub fn system(messages: &[Message]) -> &str {
    messages
        .first()
        .filter(|m| m.role == MessageRole::System)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

/// Tool results fed back so far in a worker loop
pub fn tool_results(messages: &[Message]) -> Vec<&str> {
    messages
        .iter()
        .filter(|m| m.role == MessageRole::Tool)
        .map(|m| m.content.as_str())
        .collect()
}

/// Last user message of a request
pub fn last_user(messages: &[Message]) -> &str {
    messages
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::User)
        .map(|m| m.content.as_str())
        .unwrap_or_default()
}

pub fn is_planner(messages: &[Message]) -> bool {
    system(messages).contains("task planner")
}

pub fn is_aggregator(messages: &[Message]) -> bool {
    system(messages).contains("customer service manager")
}

/// Config with web search off so nothing reaches the network
pub fn offline_config() -> Config {
    let mut config = Config::default();
    config.search.enabled = false;
    config
}

pub struct Harness {
    pub orchestrator: Orchestrator,
    pub sessions: Arc<InMemorySessionStore>,
    pub bus: Arc<MessageBus>,
    pub calls: Arc<Mutex<Vec<Vec<Message>>>>,
}

/// Orchestrator with real tool-loop workers and tools over `knowledge`
pub fn harness(
    config: &Config,
    model: DeskModel,
    knowledge: Arc<dyn KnowledgeStore>,
    overrides: Vec<Arc<dyn Worker>>,
) -> Harness {
    let calls = model.calls.clone();
    let router = Arc::new(LLMRouter::new(
        vec![Box::new(model)],
        Arc::new(LLMConfig::default()),
    ));
    let bus = Arc::new(MessageBus::new());
    let registry = ToolRegistry::from_config(config, knowledge);

    let mut workers = WorkerSet::new(router.clone(), &registry, bus.clone(), &config.orchestrator);
    for worker in overrides {
        workers = workers.with_worker(worker);
    }

    let sessions = Arc::new(InMemorySessionStore::new());
    let orchestrator = Orchestrator::new(
        router,
        workers,
        sessions.clone(),
        bus.clone(),
        &config.orchestrator,
    );

    Harness {
        orchestrator,
        sessions,
        bus,
        calls,
    }
}
