//! Status, termination and failure decisions.
//!
//! Each decision is a trait so [`IterationStatusMonitor`] can be assembled
//! from real services in the runtime and from fakes in tests:
//!
//! - [`StatusQuery`] - statuses of every command of an iteration
//!   ([`CommandStatusMonitor`])
//! - [`TerminationCheck`] - whether termination rules have tripped
//!   ([`TerminationChecker`])
//! - [`FailureCheck`] - whether failure criteria are exceeded
//!   ([`FailureEvaluator`])

pub mod command_status;
pub mod failure;
pub mod iteration_status;
pub mod termination;

pub use command_status::CommandStatusMonitor;
pub use failure::FailureEvaluator;
pub use iteration_status::IterationStatusMonitor;
pub use termination::{GracePeriodState, TerminationChecker};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{CommandStatus, HttpIteration};

#[async_trait]
pub trait StatusQuery: Send + Sync {
    async fn query(&self, iteration: &HttpIteration) -> Vec<CommandStatus>;
}

#[async_trait]
pub trait TerminationCheck: Send + Sync {
    /// Evaluates the iteration's termination rules against current metrics.
    async fn is_termination_required(&self, iteration: &HttpIteration) -> bool;

    /// Whether a termination was already decided, without evaluating again.
    async fn has_terminated(&self, iteration: &HttpIteration) -> bool {
        self.is_termination_required(iteration).await
    }
}

#[async_trait]
pub trait FailureCheck: Send + Sync {
    async fn is_error_rate_exceeded(
        &self,
        iteration: &HttpIteration,
        cancel: &CancellationToken,
    ) -> bool;
}
