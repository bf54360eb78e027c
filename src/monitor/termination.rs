//! Early termination on a sustained error rate.
//!
//! Each active [`TerminationRule`](crate::domain::TerminationRule) of an
//! iteration owns a [`GracePeriodState`]. The rule trips once the error
//! rate has stayed at or above its threshold for the whole grace period;
//! any sample below the threshold restarts the clock. Once an iteration has
//! tripped it stays terminated until [`TerminationChecker::reset`].

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};
use uuid::Uuid;

use super::TerminationCheck;
use crate::cluster::{EntityDiscovery, MetricsQueryService};
use crate::domain::HttpIteration;

/// Tracks when the current stretch of elevated errors began.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GracePeriodState {
    error_trend_start: Option<Instant>,
}

impl GracePeriodState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_trend_start(&self) -> Option<Instant> {
        self.error_trend_start
    }

    /// Feeds one observation and reports whether the grace period has
    /// fully elapsed with the error rate at or above `threshold`.
    pub fn update_and_check(
        &mut self,
        total: u64,
        errors: u64,
        threshold: f64,
        grace_period: Duration,
    ) -> bool {
        self.update_and_check_at(Instant::now(), total, errors, threshold, grace_period)
    }

    /// [`update_and_check`](Self::update_and_check) with an explicit clock.
    pub fn update_and_check_at(
        &mut self,
        now: Instant,
        total: u64,
        errors: u64,
        threshold: f64,
        grace_period: Duration,
    ) -> bool {
        if total == 0 {
            self.error_trend_start = None;
            return false;
        }

        let error_rate = errors as f64 / total as f64;
        if error_rate >= threshold {
            let start = *self.error_trend_start.get_or_insert(now);
            now.saturating_duration_since(start) >= grace_period
        } else {
            self.error_trend_start = None;
            false
        }
    }
}

type GraceKey = (Uuid, usize);

pub struct TerminationChecker {
    discovery: Arc<EntityDiscovery>,
    metrics: Arc<dyn MetricsQueryService>,
    states: DashMap<GraceKey, Arc<Mutex<GracePeriodState>>>,
    tripped: DashMap<Uuid, Instant>,
}

impl TerminationChecker {
    pub fn new(discovery: Arc<EntityDiscovery>, metrics: Arc<dyn MetricsQueryService>) -> Self {
        Self {
            discovery,
            metrics,
            states: DashMap::new(),
            tripped: DashMap::new(),
        }
    }

    /// Evaluates every active rule of `iteration`. Each rule's grace state
    /// is updated even when an earlier rule already tripped.
    pub async fn is_termination_required(&self, iteration: &HttpIteration) -> bool {
        if self.tripped.contains_key(&iteration.id()) {
            return true;
        }

        let rules: Vec<_> = iteration
            .termination_rules()
            .iter()
            .enumerate()
            .filter(|(_, rule)| rule.is_active())
            .collect();
        if rules.is_empty() {
            return false;
        }

        let Some(record) = self.discovery.find_by_id(iteration.id()) else {
            error!(iteration = %iteration.name(), "cannot evaluate termination: iteration not discoverable");
            return false;
        };
        let codes = match self
            .metrics
            .get_response_code_metrics(&record.fully_qualified_name)
            .await
        {
            Ok(codes) => codes,
            Err(e) => {
                error!(iteration = %iteration.name(), error = %e, "cannot evaluate termination: response codes unavailable");
                return false;
            }
        };

        let total = codes.total();
        let now = Instant::now();
        let mut terminate = false;
        for (index, rule) in rules {
            let (Some(threshold), Some(grace_period)) = (rule.max_error_rate, rule.grace_period())
            else {
                continue;
            };
            let errors = codes.count_matching(&rule.error_status_codes);
            let state = self
                .states
                .entry((iteration.id(), index))
                .or_default()
                .clone();
            let tripped = state
                .lock()
                .update_and_check_at(now, total, errors, threshold, grace_period);
            if tripped {
                info!(
                    iteration = %iteration.name(),
                    rule = index + 1,
                    errors,
                    total,
                    threshold,
                    "termination rule tripped"
                );
                terminate = true;
            }
        }

        if terminate {
            self.tripped.insert(iteration.id(), now);
        }
        terminate
    }

    pub fn has_terminated(&self, iteration_id: Uuid) -> bool {
        self.tripped.contains_key(&iteration_id)
    }

    /// Drops the grace states of an iteration whose monitoring ended.
    pub fn release(&self, iteration_id: Uuid) {
        self.states.retain(|(id, _), _| *id != iteration_id);
    }

    /// Drops grace states and the terminated latch.
    pub fn reset(&self, iteration_id: Uuid) {
        self.release(iteration_id);
        self.tripped.remove(&iteration_id);
    }

    pub fn tracked_states(&self) -> usize {
        self.states.len()
    }
}

#[async_trait]
impl TerminationCheck for TerminationChecker {
    async fn is_termination_required(&self, iteration: &HttpIteration) -> bool {
        TerminationChecker::is_termination_required(self, iteration).await
    }

    async fn has_terminated(&self, iteration: &HttpIteration) -> bool {
        TerminationChecker::has_terminated(self, iteration.id())
    }
}
