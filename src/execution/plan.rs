//! Plan execution: rounds in order.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::{RoundExecutor, RoundSummary};
use crate::domain::Plan;
use crate::error::ExecutionError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub plan_id: Uuid,
    pub rounds: Vec<RoundSummary>,
    /// Rounds never started because the run was cancelled.
    pub skipped_rounds: usize,
}

pub struct PlanExecutor {
    rounds: Arc<RoundExecutor>,
}

impl PlanExecutor {
    pub fn new(rounds: Arc<RoundExecutor>) -> Self {
        Self { rounds }
    }

    /// Runs every round of `plan` one after another. Stops starting new
    /// rounds once `cancel` fires.
    pub async fn execute(
        &self,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> Result<PlanSummary, ExecutionError> {
        if !plan.rounds().iter().any(|r| r.is_valid()) {
            return Err(ExecutionError::NothingToRun {
                plan: plan.name().to_string(),
            });
        }

        let mut summary = PlanSummary {
            plan_id: plan.id(),
            ..PlanSummary::default()
        };
        info!(plan = %plan.name(), rounds = plan.rounds().len(), "plan started");

        for (index, round) in plan.rounds().iter().enumerate() {
            if cancel.is_cancelled() {
                summary.skipped_rounds = plan.rounds().len() - index;
                warn!(plan = %plan.name(), skipped = summary.skipped_rounds, "plan cancelled");
                break;
            }
            summary.rounds.push(self.rounds.execute(round, cancel).await?);
        }

        info!(plan = %plan.name(), "plan finished");
        Ok(summary)
    }
}
