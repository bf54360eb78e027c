//! Folding every signal into one [`EntityExecutionStatus`].

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{FailureCheck, StatusQuery, TerminationCheck};
use crate::domain::{CommandStatus, EntityExecutionStatus, HttpIteration, Round};

/// Reports the status of an iteration. The first matching rule wins:
///
/// 1. run cancelled -> `Cancelled`
/// 2. termination decided -> `Terminated`
/// 3. failure criteria exceeded -> `Failed`
/// 4. any command ongoing -> `Ongoing`
/// 5. any command scheduled -> `Scheduled`
/// 6. otherwise -> `Success`
///
/// Later signals are only computed when earlier ones did not match.
pub struct IterationStatusMonitor {
    cancel: CancellationToken,
    termination: Arc<dyn TerminationCheck>,
    failure: Arc<dyn FailureCheck>,
    statuses: Arc<dyn StatusQuery>,
}

impl IterationStatusMonitor {
    pub fn new(
        cancel: CancellationToken,
        termination: Arc<dyn TerminationCheck>,
        failure: Arc<dyn FailureCheck>,
        statuses: Arc<dyn StatusQuery>,
    ) -> Self {
        Self {
            cancel,
            termination,
            failure,
            statuses,
        }
    }

    pub async fn status(&self, iteration: &HttpIteration) -> EntityExecutionStatus {
        if self.cancel.is_cancelled() {
            return EntityExecutionStatus::Cancelled;
        }

        let statuses = self.statuses.query(iteration).await;
        let in_flight = statuses.iter().any(CommandStatus::is_active);

        // Rules are only re-evaluated while commands can still react.
        let terminated = statuses.contains(&CommandStatus::Terminated)
            || if in_flight {
                self.termination.is_termination_required(iteration).await
            } else {
                self.termination.has_terminated(iteration).await
            };
        if terminated {
            return EntityExecutionStatus::Terminated;
        }

        if self
            .failure
            .is_error_rate_exceeded(iteration, &self.cancel)
            .await
        {
            return EntityExecutionStatus::Failed;
        }
        if statuses.contains(&CommandStatus::Ongoing) {
            return EntityExecutionStatus::Ongoing;
        }
        if statuses.contains(&CommandStatus::Scheduled) {
            return EntityExecutionStatus::Scheduled;
        }
        EntityExecutionStatus::Success
    }

    /// Status of every iteration of `round`, keyed by iteration id.
    pub async fn round_statuses(&self, round: &Round) -> BTreeMap<Uuid, EntityExecutionStatus> {
        let checks = round
            .iterations()
            .iter()
            .map(|it| async move { (it.id(), self.status(it).await) });
        join_all(checks).await.into_iter().collect()
    }
}
