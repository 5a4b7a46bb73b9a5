//! Orchestrator
//!
//! Runs one user turn through `Planning -> Dispatching <-> Working ->
//! Summarizing -> Idle`. The board is owned here for the length of a turn
//! and only ever changes through [`sdk::board::reduce`]. The session is
//! checkpointed after planning, after every fan-in batch and after the
//! reset.

use super::aggregator::Aggregator;
use super::dispatcher::{route, Dispatcher, Route};
use super::planner::Planner;
use crate::config::OrchestratorConfig;
use crate::llm::router::LLMRouter;
use crate::message_bus::{Event, MessageBus, PlannedTask};
use crate::session::{SessionState, SessionStore};
use crate::workers::WorkerSet;
use sdk::board::{reduce, Board, BoardUpdate};
use sdk::errors::EngineError;
use sdk::history::HistoryEntry;
use sdk::task::Task;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result of one call to [`Orchestrator::handle_turn`]
#[derive(Debug, Clone, Serialize)]
pub struct TurnOutcome {
    pub session_id: String,
    pub reply: String,
    /// The board as it stood when the reply was composed
    pub tasks: Vec<Task>,
    pub incomplete: usize,
    /// True when planning fell back to the single general task
    pub fallback: bool,
    pub rounds: u32,
    /// Reply of an interrupted earlier turn that was finished first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resumed: Option<String>,
}

struct Finished {
    reply: String,
    tasks: Vec<Task>,
    incomplete: usize,
    rounds: u32,
}

pub struct Orchestrator {
    planner: Planner,
    dispatcher: Dispatcher,
    aggregator: Aggregator,
    sessions: Arc<dyn SessionStore>,
    bus: Arc<MessageBus>,
    max_dispatch_rounds: u32,
}

impl Orchestrator {
    pub fn new(
        router: Arc<LLMRouter>,
        workers: WorkerSet,
        sessions: Arc<dyn SessionStore>,
        bus: Arc<MessageBus>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            planner: Planner::new(router.clone(), config.history_window),
            dispatcher: Dispatcher::new(workers, bus.clone()),
            aggregator: Aggregator::new(router, bus.clone()),
            sessions,
            bus,
            max_dispatch_rounds: config.max_dispatch_rounds.max(1),
        }
    }

    pub fn bus(&self) -> Arc<MessageBus> {
        self.bus.clone()
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    /// Handle one user message for `session_id`.
    ///
    /// Collaborator failures degrade the reply but never fail the turn.
    /// Errors are limited to loading the session and reducer conflicts.
    pub async fn handle_turn(
        &self,
        session_id: &str,
        utterance: &str,
    ) -> Result<TurnOutcome, EngineError> {
        let mut state = self.sessions.load(session_id).await?;

        let resumed = if state.board.is_empty() {
            None
        } else {
            warn!(
                "Session {} has {} tasks from an interrupted turn, finishing it first",
                session_id,
                state.board.len()
            );
            let finished = self.finish_turn(session_id, &mut state).await?;
            Some(finished.reply)
        };

        info!("Turn started for session {}", session_id);
        self.bus
            .publish(Event::TurnStarted {
                session_id: session_id.to_string(),
                utterance: utterance.to_string(),
            })
            .await;

        state.history.append(HistoryEntry::user(utterance));
        if state.title.is_none() {
            state.title = state.history.title();
        }

        let plan = self
            .planner
            .plan(utterance, state.history.prior_turns())
            .await;

        self.bus
            .publish(Event::PlanCreated {
                session_id: session_id.to_string(),
                tasks: plan
                    .tasks
                    .iter()
                    .map(|t| PlannedTask {
                        task_id: t.id().clone(),
                        task_type: t.task_type(),
                        description: t.description().to_string(),
                    })
                    .collect(),
                fallback: plan.fallback,
            })
            .await;

        state.board = Self::apply(&state.board, BoardUpdate::Tasks(plan.tasks))?;
        self.checkpoint(session_id, &state).await;

        let finished = self.finish_turn(session_id, &mut state).await?;

        Ok(TurnOutcome {
            session_id: session_id.to_string(),
            reply: finished.reply,
            tasks: finished.tasks,
            incomplete: finished.incomplete,
            fallback: plan.fallback,
            rounds: finished.rounds,
            resumed,
        })
    }

    /// Dispatch until nothing is pending or the round guard trips, then
    /// summarize and reset the board.
    async fn finish_turn(
        &self,
        session_id: &str,
        state: &mut SessionState,
    ) -> Result<Finished, EngineError> {
        let mut rounds = 0;

        while let Route::Dispatch(units) = route(&state.board, &state.history) {
            if rounds >= self.max_dispatch_rounds {
                warn!(
                    "Round guard reached after {} rounds with {} tasks pending",
                    rounds,
                    units.len()
                );
                break;
            }
            rounds += 1;
            debug!("Dispatch round {} with {} units", rounds, units.len());

            for output in self.dispatcher.fan_out(units).await {
                state.history.extend(output.side_messages);
                state.board = Self::apply(&state.board, BoardUpdate::Task(output.task))?;
            }
            self.checkpoint(session_id, state).await;
        }

        let summary = self
            .aggregator
            .summarize(session_id, &state.board, &state.history)
            .await;

        let tasks = state.board.tasks().to_vec();
        state.history.append(HistoryEntry::reply(summary.reply.as_str()));
        state.board = Self::apply(&state.board, summary.reset)?;
        self.checkpoint(session_id, state).await;

        self.bus
            .publish(Event::TurnCompleted {
                session_id: session_id.to_string(),
                reply: summary.reply.clone(),
                incomplete: summary.incomplete,
            })
            .await;

        info!(
            "Turn completed for session {} ({} tasks, {} rounds)",
            session_id,
            tasks.len(),
            rounds
        );

        Ok(Finished {
            reply: summary.reply,
            tasks,
            incomplete: summary.incomplete,
            rounds,
        })
    }

    fn apply(board: &Board, update: BoardUpdate) -> Result<Board, EngineError> {
        reduce(board, update).map_err(|conflict| {
            error!("Reducer conflict, aborting turn: {}", conflict);
            EngineError::from(conflict)
        })
    }

    async fn checkpoint(&self, session_id: &str, state: &SessionState) {
        if let Err(e) = self.sessions.save(session_id, state).await {
            warn!("Checkpoint for session {} failed: {}", session_id, e);
        }
    }
}
