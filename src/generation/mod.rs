//! Generation orchestration.
//!
//! [`Orchestrator`] turns requests into jobs and drives each one through a
//! supervised background task with bounded inference concurrency, a timeout
//! and cooperative cancellation.

mod orchestrator;
mod runner;
mod tasks;

pub use orchestrator::{Orchestrator, TaskResult, TaskStatus};
pub use runner::{OrchestratorSettings, COVER_TASK};
pub use tasks::TaskTable;
