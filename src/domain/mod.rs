//! Domain model: plans, rounds, iterations, commands and statuses.

pub mod command;
pub mod iteration;
pub mod plan;
pub mod status;

pub use command::ExecutionCommand;
pub use iteration::{
    FailureCriteria, HttpIteration, HttpRequestSpec, IterationMode, IterationSetup,
    TerminationRule,
};
pub use plan::{Plan, PlanSetup, Round, RoundSetup};
pub use status::{CommandStatus, EntityExecutionStatus};
