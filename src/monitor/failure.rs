//! Post-run failure criteria evaluation.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{FailureCheck, StatusQuery};
use crate::cluster::{EntityDiscovery, MetricsQueryService};
use crate::domain::{CommandStatus, FailureCriteria, HttpIteration};
use crate::error::RpcError;
use crate::metrics::{DurationMetrics, ResponseCodeMetrics};

/// Decides whether a finished iteration violated its failure criteria.
///
/// Nothing is evaluated while any command of the iteration is still
/// scheduled or ongoing. Rate and latency criteria are read independently;
/// a read error makes that criterion pass and is logged.
pub struct FailureEvaluator {
    statuses: Arc<dyn StatusQuery>,
    discovery: Arc<EntityDiscovery>,
    metrics: Arc<dyn MetricsQueryService>,
}

impl FailureEvaluator {
    pub fn new(
        statuses: Arc<dyn StatusQuery>,
        discovery: Arc<EntityDiscovery>,
        metrics: Arc<dyn MetricsQueryService>,
    ) -> Self {
        Self {
            statuses,
            discovery,
            metrics,
        }
    }

    pub async fn is_error_rate_exceeded(
        &self,
        iteration: &HttpIteration,
        cancel: &CancellationToken,
    ) -> bool {
        let criteria = iteration.failure_criteria();
        if !criteria.has_rate_criteria() && !criteria.has_duration_criteria() {
            return false;
        }

        let statuses = self.statuses.query(iteration).await;
        if statuses.iter().any(CommandStatus::is_active) {
            debug!(iteration = %iteration.name(), "commands still active, failure not evaluated");
            return false;
        }

        let Some(record) = self.discovery.find_by_id(iteration.id()) else {
            error!(iteration = %iteration.name(), "cannot evaluate failure: iteration not discoverable");
            return false;
        };
        let fqn = record.fully_qualified_name.as_str();

        let rate_failed = if criteria.has_rate_criteria() {
            match cancellable(cancel, self.metrics.get_response_code_metrics(fqn)).await {
                Ok(codes) => rate_exceeded(criteria, &codes),
                Err(e) => {
                    error!(iteration = %iteration.name(), error = %e, "response code metrics unavailable");
                    false
                }
            }
        } else {
            false
        };

        let duration_failed = if criteria.has_duration_criteria() {
            match cancellable(cancel, self.metrics.get_duration_metrics(fqn)).await {
                Ok(duration) => duration_exceeded(criteria, &duration),
                Err(e) => {
                    error!(iteration = %iteration.name(), error = %e, "duration metrics unavailable");
                    false
                }
            }
        } else {
            false
        };

        rate_failed || duration_failed
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl std::future::Future<Output = Result<T, RpcError>>,
) -> Result<T, RpcError> {
    tokio::select! {
        result = call => result,
        _ = cancel.cancelled() => Err(RpcError::Cancelled),
    }
}

/// Strictly greater than the configured ceiling fails.
fn rate_exceeded(criteria: &FailureCriteria, codes: &ResponseCodeMetrics) -> bool {
    let (Some(max_rate), total) = (criteria.max_error_rate, codes.total()) else {
        return false;
    };
    if total == 0 {
        return false;
    }
    let errors = codes.count_matching(&criteria.error_status_codes);
    errors as f64 / total as f64 > max_rate
}

fn duration_exceeded(criteria: &FailureCriteria, duration: &DurationMetrics) -> bool {
    if duration.count == 0 {
        return false;
    }
    [
        (criteria.max_p90, duration.p90),
        (criteria.max_p50, duration.p50),
        (criteria.max_p10, duration.p10),
        (criteria.max_avg, duration.average),
    ]
    .into_iter()
    .any(|(ceiling, observed)| ceiling.is_some_and(|max| observed > max))
}

#[async_trait]
impl FailureCheck for FailureEvaluator {
    async fn is_error_rate_exceeded(
        &self,
        iteration: &HttpIteration,
        cancel: &CancellationToken,
    ) -> bool {
        FailureEvaluator::is_error_rate_exceeded(self, iteration, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ResponseCodeSummary;
    use std::collections::BTreeSet;

    fn criteria(rate: f64, codes: &[u16]) -> FailureCriteria {
        FailureCriteria {
            max_error_rate: Some(rate),
            error_status_codes: codes.iter().copied().collect::<BTreeSet<_>>(),
            ..FailureCriteria::default()
        }
    }

    fn tally(entries: &[(u16, u64)]) -> ResponseCodeMetrics {
        ResponseCodeMetrics {
            summaries: entries
                .iter()
                .map(|(code, count)| ResponseCodeSummary {
                    status_code: *code,
                    reason: String::new(),
                    count: *count,
                })
                .collect(),
        }
    }

    #[test]
    fn test_rate_strictly_greater_fails() {
        let c = criteria(0.5, &[500]);
        assert!(rate_exceeded(&c, &tally(&[(500, 6), (200, 4)])));
        assert!(!rate_exceeded(&c, &tally(&[(500, 5), (200, 5)])));
        assert!(!rate_exceeded(&c, &tally(&[(500, 4), (200, 6)])));
    }

    #[test]
    fn test_rate_without_responses_passes() {
        assert!(!rate_exceeded(&criteria(0.1, &[500]), &tally(&[])));
    }

    #[test]
    fn test_unlisted_codes_are_not_errors() {
        let c = criteria(0.1, &[503]);
        assert!(!rate_exceeded(&c, &tally(&[(500, 9), (200, 1)])));
    }

    #[test]
    fn test_duration_ceilings() {
        let duration = DurationMetrics {
            count: 10,
            average: 120.0,
            p90: 300.0,
            p50: 100.0,
            p10: 20.0,
            ..DurationMetrics::default()
        };
        let p90 = FailureCriteria {
            max_p90: Some(250.0),
            ..FailureCriteria::default()
        };
        let avg = FailureCriteria {
            max_avg: Some(150.0),
            ..FailureCriteria::default()
        };
        assert!(duration_exceeded(&p90, &duration));
        assert!(!duration_exceeded(&avg, &duration));
        assert!(!duration_exceeded(&p90, &DurationMetrics::default()));
    }
}
