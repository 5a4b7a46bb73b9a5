//! Dispatcher
//!
//! [`route`] decides whether a board still has work; [`Dispatcher::fan_out`]
//! runs one work unit per pending task concurrently and joins them all
//! before returning. Workers are looked up by task type in the
//! [`WorkerSet`], never by name.

use crate::message_bus::{Event, MessageBus};
use crate::workers::WorkerSet;
use futures::stream::{FuturesUnordered, StreamExt};
use sdk::board::Board;
use sdk::history::{ConversationHistory, HistoryEntry};
use sdk::task::Task;
use sdk::worker::WorkerOutput;
use std::sync::Arc;
use tracing::debug;

/// What the orchestration loop does next
#[derive(Debug)]
pub enum Route {
    /// No pending tasks: proceed to aggregation
    Summarize,
    /// One unit per pending task, in board order
    Dispatch(Vec<WorkUnit>),
}

/// One pending task plus the read-only history view its worker receives
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub task: Task,
    /// Earlier turns only; shared by every unit of a batch
    pub history: Arc<[HistoryEntry]>,
}

/// Route a board. Tasks with the same type are dispatched separately.
pub fn route(board: &Board, history: &ConversationHistory) -> Route {
    let pending = board.pending();
    if pending.is_empty() {
        return Route::Summarize;
    }

    let snapshot: Arc<[HistoryEntry]> = Arc::from(history.prior_turns());
    Route::Dispatch(
        pending
            .into_iter()
            .map(|task| WorkUnit {
                task: task.clone(),
                history: snapshot.clone(),
            })
            .collect(),
    )
}

pub struct Dispatcher {
    workers: WorkerSet,
    bus: Arc<MessageBus>,
}

impl Dispatcher {
    pub fn new(workers: WorkerSet, bus: Arc<MessageBus>) -> Self {
        Self { workers, bus }
    }

    /// Run every unit concurrently and wait for all of them.
    ///
    /// Outputs are returned in completion order.
    pub async fn fan_out(&self, units: Vec<WorkUnit>) -> Vec<WorkerOutput> {
        debug!("Fanning out {} work units", units.len());

        let mut in_flight: FuturesUnordered<_> =
            units.into_iter().map(|unit| self.run_unit(unit)).collect();

        let mut outputs = Vec::with_capacity(in_flight.len());
        while let Some(output) = in_flight.next().await {
            outputs.push(output);
        }
        outputs
    }

    async fn run_unit(&self, unit: WorkUnit) -> WorkerOutput {
        let task_id = unit.task.id().clone();
        let task_type = unit.task.task_type();

        self.bus
            .publish(Event::WorkerStarted {
                task_id: task_id.clone(),
                task_type,
            })
            .await;

        let output = self
            .workers
            .for_type(task_type)
            .handle(unit.task, &unit.history)
            .await;

        self.bus
            .publish(Event::WorkerFinished {
                task_id,
                task_type,
                status: output.task.status(),
            })
            .await;

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LLMConfig, OrchestratorConfig};
    use crate::llm::router::LLMRouter;
    use crate::tools::ToolRegistry;
    use async_trait::async_trait;
    use sdk::board::BoardUpdate;
    use sdk::task::TaskType;
    use sdk::worker::Worker;
    use std::time::Duration;
    use tokio::sync::Barrier;

    /// Completes its task only once every sibling has reached the barrier
    struct Rendezvous(TaskType, Arc<Barrier>);

    #[async_trait]
    impl Worker for Rendezvous {
        fn task_type(&self) -> TaskType {
            self.0
        }

        async fn handle(&self, task: Task, _history: &[HistoryEntry]) -> WorkerOutput {
            self.1.wait().await;
            WorkerOutput::new(task.complete("met"))
        }
    }

    #[test]
    fn test_route_empty_or_done_board_summarizes() {
        let history = ConversationHistory::new();
        assert!(matches!(route(&Board::new(), &history), Route::Summarize));

        let done = Task::new(TaskType::Ticket, "fare", "fare A to B").complete("4 yuan");
        let board = Board::new().apply(BoardUpdate::Task(done)).unwrap();
        assert!(matches!(route(&board, &history), Route::Summarize));
    }

    #[test]
    fn test_route_dispatches_each_pending_task() {
        let a = Task::new(TaskType::Ticket, "fare", "fare A to B");
        let b = Task::new(TaskType::Ticket, "train", "last train at C");
        let c = Task::new(TaskType::General, "hi", "hi").complete("hello");
        let board = Board::new()
            .apply(BoardUpdate::Tasks(vec![a.clone(), b.clone(), c]))
            .unwrap();

        let mut history = ConversationHistory::new();
        history.append(HistoryEntry::user("old"));
        history.append(HistoryEntry::reply("old reply"));
        history.append(HistoryEntry::user("fare A to B and last train at C"));

        match route(&board, &history) {
            Route::Dispatch(units) => {
                assert_eq!(units.len(), 2);
                assert_eq!(units[0].task.id(), a.id());
                assert_eq!(units[1].task.id(), b.id());
                // the in-flight turn is not part of the worker view
                assert_eq!(units[0].history.len(), 2);
            }
            Route::Summarize => panic!("expected dispatch"),
        }
    }

    #[tokio::test]
    async fn test_fan_out_runs_units_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let router = Arc::new(LLMRouter::new(Vec::new(), Arc::new(LLMConfig::default())));
        let bus = Arc::new(MessageBus::new());
        let workers = WorkerSet::new(
            router,
            &ToolRegistry::empty(),
            bus.clone(),
            &OrchestratorConfig::default(),
        )
        .with_worker(Arc::new(Rendezvous(TaskType::Ticket, barrier.clone())))
        .with_worker(Arc::new(Rendezvous(TaskType::Complaint, barrier)));
        let dispatcher = Dispatcher::new(workers, bus);

        let board = Board::new()
            .apply(BoardUpdate::Tasks(vec![
                Task::new(TaskType::Ticket, "fare", "fare A to B"),
                Task::new(TaskType::Complaint, "escalator", "escalator at A is broken"),
            ]))
            .unwrap();
        let units = match route(&board, &ConversationHistory::new()) {
            Route::Dispatch(units) => units,
            Route::Summarize => panic!("expected dispatch"),
        };

        // run one after another, the first unit would wait on the barrier forever
        let outputs = tokio::time::timeout(Duration::from_secs(5), dispatcher.fan_out(units))
            .await
            .expect("fan_out did not run units concurrently");

        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().all(|o| o.task.is_done()));
    }
}
