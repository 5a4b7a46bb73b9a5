//! Conductor
//!
//! The task-board orchestration core: planning, concurrent dispatch,
//! aggregation and the per-turn state machine that ties them together.

pub mod aggregator;
pub mod dispatcher;
pub mod orchestrator;
pub mod planner;

pub use aggregator::{Aggregator, Summary};
pub use dispatcher::{route, Dispatcher, Route, WorkUnit};
pub use orchestrator::{Orchestrator, TurnOutcome};
pub use planner::{Plan, Planner};
