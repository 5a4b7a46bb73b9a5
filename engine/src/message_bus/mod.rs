//! Message Bus for turn progress events
//!
//! Pub/sub over bounded channels. The orchestrator, workers and aggregator
//! publish what they are doing; the CLI subscribes to print progress and to
//! stream the reply as it is generated.
//!
//! Publishing never waits on a slow subscriber: when a subscriber's buffer
//! is full the event is dropped for that subscriber only.

use sdk::task::{TaskId, TaskStatus, TaskType};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Channel buffer size for bounded channels
const CHANNEL_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum EventType {
    TurnStarted,
    PlanCreated,
    WorkerStarted,
    WorkerFinished,
    ToolCalled,
    ReplyChunk,
    TurnCompleted,
    /// Subscribe to all event types
    All,
}

/// Planned task as reported on the bus
#[derive(Debug, Clone, Serialize)]
pub struct PlannedTask {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    TurnStarted {
        session_id: String,
        utterance: String,
    },
    PlanCreated {
        session_id: String,
        tasks: Vec<PlannedTask>,
        /// True when the single general fallback task was used
        fallback: bool,
    },
    WorkerStarted {
        task_id: TaskId,
        task_type: TaskType,
    },
    WorkerFinished {
        task_id: TaskId,
        task_type: TaskType,
        status: TaskStatus,
    },
    ToolCalled {
        task_id: TaskId,
        tool: String,
        args: serde_json::Value,
        /// found, not_found or failed
        outcome: String,
    },
    ReplyChunk {
        session_id: String,
        text: String,
    },
    TurnCompleted {
        session_id: String,
        reply: String,
        /// Tasks that were still pending when the turn was summarized
        incomplete: usize,
    },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::TurnStarted { .. } => EventType::TurnStarted,
            Event::PlanCreated { .. } => EventType::PlanCreated,
            Event::WorkerStarted { .. } => EventType::WorkerStarted,
            Event::WorkerFinished { .. } => EventType::WorkerFinished,
            Event::ToolCalled { .. } => EventType::ToolCalled,
            Event::ReplyChunk { .. } => EventType::ReplyChunk,
            Event::TurnCompleted { .. } => EventType::TurnCompleted,
        }
    }
}

/// Message bus for pub/sub of turn events
pub struct MessageBus {
    channels: Arc<Mutex<HashMap<EventType, Vec<mpsc::Sender<Event>>>>>,
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to a specific event type, or `EventType::All`
    pub async fn subscribe(&self, event_type: EventType) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
        let mut channels = self.channels.lock().await;
        channels.entry(event_type).or_default().push(tx);
        rx
    }

    /// Publish an event to its type's subscribers and to `All` subscribers.
    ///
    /// Closed subscribers are pruned.
    pub async fn publish(&self, event: Event) {
        let mut channels = self.channels.lock().await;
        let event_type = event.event_type();

        for key in [event_type, EventType::All] {
            if let Some(subscribers) = channels.get_mut(&key) {
                subscribers.retain(|tx| match tx.try_send(event.clone()) {
                    Ok(()) => true,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::debug!("Subscriber buffer full, dropping {:?}", event_type);
                        true
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => false,
                });
            }
        }
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}
