//! Scheduling and running plans.
//!
//! [`PlanExecutor`] walks rounds in order; [`RoundExecutor`] expands a
//! round into client waves of commands; [`IterationScheduler`] times each
//! command and wraps it in metrics monitoring; an [`IterationExecutor`]
//! sends the requests.

pub mod iteration;
pub mod plan;
pub mod round;
pub mod scheduler;

pub use iteration::{HttpIterationExecutor, IterationExecutor, IterationRun, TERMINATION_CHECK_INTERVAL};
pub use plan::{PlanExecutor, PlanSummary};
pub use round::{CommandOutcome, RoundExecutor, RoundSummary};
pub use scheduler::IterationScheduler;
