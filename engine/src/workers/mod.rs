//! Task-type workers
//!
//! Every task type is served by a [`ToolLoopWorker`] configured with that
//! type's [`WorkerProfile`]. [`WorkerSet`] holds exactly one worker per
//! variant, so a task type without a worker cannot be constructed.

pub mod tool_loop;

pub use tool_loop::ToolLoopWorker;

use crate::config::OrchestratorConfig;
use crate::llm::router::LLMRouter;
use crate::message_bus::MessageBus;
use crate::tools::ToolRegistry;
use sdk::task::TaskType;
use sdk::worker::Worker;
use std::sync::Arc;

/// Instructions and tool set for one task type
#[derive(Debug, Clone, Copy)]
pub struct WorkerProfile {
    pub task_type: TaskType,
    /// Author name on the worker's intermediate history entries
    pub name: &'static str,
    pub instructions: &'static str,
    pub tools: &'static [&'static str],
}

impl WorkerProfile {
    pub fn for_type(task_type: TaskType) -> Self {
        match task_type {
            TaskType::Ticket => Self {
                task_type,
                name: "ticket_worker",
                instructions: "You are the metro ticketing specialist. Answer fare, first/last train and \
                     ticketing questions. Always look fares and times up with the tools; never guess \
                     them, and base the answer only on what the tools return. Only answer the \
                     ticketing part of the request.",
                tools: &["query_fare", "query_train_times"],
            },
            TaskType::Complaint => Self {
                task_type,
                name: "complaint_worker",
                instructions: "You are the metro customer care specialist. Acknowledge the passenger's \
                     problem briefly and sincerely, file it with submit_complaint (pick a short \
                     category), then give the ticket number and handling time exactly as the tool \
                     returned them.",
                tools: &["submit_complaint"],
            },
            TaskType::General => Self {
                task_type,
                name: "general_worker",
                instructions: "You are the metro station service assistant. Reply to greetings and small \
                     talk directly and warmly. For station rules, prohibited items or ticketing \
                     regulations call lookup_policy with short keywords, and keep every \
                     [Clause n] (Source: ...) marker from the result in your answer.",
                tools: &["lookup_policy"],
            },
            TaskType::Manager => Self {
                task_type,
                name: "manager_worker",
                instructions: "You are the operations assistant for metro station managers. Help with \
                     staff rostering, service quality inspection, equipment monitoring and training \
                     plans. You have no data tools; give concise, structured, practical advice.",
                tools: &[],
            },
            TaskType::Judge => Self {
                task_type,
                name: "judge_worker",
                instructions: "You are the metro public-opinion analyst. For news, incidents, causes of \
                     disruptions or public reaction, call web_search first and then analyse the \
                     results, citing their sources. If nothing is found, answer from general \
                     knowledge and say that sources were limited.",
                tools: &["web_search"],
            },
        }
    }
}

/// One worker per task type
pub struct WorkerSet {
    ticket: Arc<dyn Worker>,
    complaint: Arc<dyn Worker>,
    general: Arc<dyn Worker>,
    manager: Arc<dyn Worker>,
    judge: Arc<dyn Worker>,
}

impl WorkerSet {
    /// Tool-loop workers for every task type, drawing tools from `registry`
    pub fn new(
        router: Arc<LLMRouter>,
        registry: &ToolRegistry,
        bus: Arc<MessageBus>,
        config: &OrchestratorConfig,
    ) -> Self {
        let build = |task_type: TaskType| -> Arc<dyn Worker> {
            let profile = WorkerProfile::for_type(task_type);
            Arc::new(
                ToolLoopWorker::new(profile, router.clone(), registry.subset(profile.tools))
                    .with_limits(config.max_tool_iterations, config.history_window)
                    .with_bus(bus.clone()),
            )
        };

        Self {
            ticket: build(TaskType::Ticket),
            complaint: build(TaskType::Complaint),
            general: build(TaskType::General),
            manager: build(TaskType::Manager),
            judge: build(TaskType::Judge),
        }
    }

    /// Replace the worker for `worker.task_type()`
    pub fn with_worker(mut self, worker: Arc<dyn Worker>) -> Self {
        match worker.task_type() {
            TaskType::Ticket => self.ticket = worker,
            TaskType::Complaint => self.complaint = worker,
            TaskType::General => self.general = worker,
            TaskType::Manager => self.manager = worker,
            TaskType::Judge => self.judge = worker,
        }
        self
    }

    pub fn for_type(&self, task_type: TaskType) -> &Arc<dyn Worker> {
        match task_type {
            TaskType::Ticket => &self.ticket,
            TaskType::Complaint => &self.complaint,
            TaskType::General => &self.general,
            TaskType::Manager => &self.manager,
            TaskType::Judge => &self.judge,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profiles_match_their_type() {
        for task_type in TaskType::ALL {
            let profile = WorkerProfile::for_type(task_type);
            assert_eq!(profile.task_type, task_type);
            assert!(!profile.instructions.is_empty());
        }
        assert!(WorkerProfile::for_type(TaskType::Manager).tools.is_empty());
        assert_eq!(
            WorkerProfile::for_type(TaskType::General).tools,
            &["lookup_policy"]
        );
    }
}
