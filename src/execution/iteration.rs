//! The per-command request loop.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::client::{HttpClient, ResolvedRequest};
use crate::cluster::{EntityDiscovery, IterationTerminationService};
use crate::domain::{CommandStatus, ExecutionCommand, HttpIteration};
use crate::error::ExecutionError;
use crate::metrics::IterationMetrics;
use crate::template::PlaceholderResolver;

/// Minimum spacing between termination checks of one command.
pub const TERMINATION_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Everything one command needs to run.
pub struct IterationRun {
    pub iteration: Arc<HttpIteration>,
    pub command: Arc<ExecutionCommand>,
    pub client: HttpClient,
    pub metrics: Arc<IterationMetrics>,
}

/// Runs a scheduled command to a terminal status.
#[async_trait]
pub trait IterationExecutor: Send + Sync {
    async fn execute(&self, run: IterationRun, cancel: &CancellationToken) -> CommandStatus;
}

/// Sends the iteration's request according to its mode.
///
/// Requests go out in batches of the mode's batch size, sequentially
/// unless `maximize_throughput` is set, with the mode's cool-down between
/// batches. Between batches the loop honours cancellation, the mode's
/// limits, and (at most every [`TERMINATION_CHECK_INTERVAL`]) the
/// termination service.
pub struct HttpIterationExecutor {
    resolver: Arc<dyn PlaceholderResolver>,
    discovery: Arc<EntityDiscovery>,
    termination: Arc<dyn IterationTerminationService>,
}

enum LoopExit {
    Completed,
    Cancelled,
    Terminated,
    Failed,
}

impl HttpIterationExecutor {
    pub fn new(
        resolver: Arc<dyn PlaceholderResolver>,
        discovery: Arc<EntityDiscovery>,
        termination: Arc<dyn IterationTerminationService>,
    ) -> Self {
        Self {
            resolver,
            discovery,
            termination,
        }
    }

    async fn termination_due(&self, fqn: Option<&str>, iteration: &HttpIteration) -> bool {
        let Some(fqn) = fqn else {
            return false;
        };
        match self.termination.is_terminated(fqn).await {
            Ok(terminated) => terminated,
            Err(e) => {
                warn!(iteration = %iteration.name(), error = %e, "termination check failed");
                false
            }
        }
    }

    async fn send_one(
        &self,
        run: &IterationRun,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let request =
            ResolvedRequest::resolve(run.iteration.name(), run.iteration.request(), &*self.resolver)?;
        match run.client.send_cancellable(&request, &run.metrics, cancel).await {
            Some(Ok(_)) => run.command.record_success(),
            Some(Err(e)) => {
                debug!(iteration = %run.iteration.name(), error = %e, "request failed");
                run.command.record_failure();
            }
            None => debug!(iteration = %run.iteration.name(), "request abandoned on cancel"),
        }
        Ok(())
    }

    async fn send_batch(
        &self,
        run: &IterationRun,
        size: u64,
        cancel: &CancellationToken,
    ) -> Result<u64, ExecutionError> {
        if run.iteration.maximize_throughput() && size > 1 {
            let results = join_all((0..size).map(|_| self.send_one(run, cancel))).await;
            results.into_iter().collect::<Result<Vec<_>, _>>()?;
            return Ok(size);
        }

        let mut sent = 0;
        for _ in 0..size {
            if cancel.is_cancelled() {
                break;
            }
            self.send_one(run, cancel).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn run_loop(&self, run: &IterationRun, cancel: &CancellationToken) -> LoopExit {
        let iteration = &run.iteration;
        let mode = iteration.mode();
        let fqn = self
            .discovery
            .find_by_id(iteration.id())
            .map(|r| r.fully_qualified_name);
        let check_termination = !iteration.termination_rules().is_empty();

        let started = Instant::now();
        let deadline = mode.time_limit().map(|limit| started + limit);
        let batch_size = u64::from(mode.batch_size().max(1));
        let cool_down = mode.cool_down();
        let mut sent: u64 = 0;
        let mut last_check = started;

        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return LoopExit::Completed;
            }
            let remaining = mode.request_limit().map(|limit| limit.saturating_sub(sent));
            if remaining == Some(0) {
                return LoopExit::Completed;
            }
            if check_termination
                && sent > 0
                && last_check.elapsed() >= TERMINATION_CHECK_INTERVAL
            {
                last_check = Instant::now();
                if self.termination_due(fqn.as_deref(), iteration).await {
                    return LoopExit::Terminated;
                }
            }

            let size = remaining.map_or(batch_size, |r| r.min(batch_size));
            match self.send_batch(run, size, cancel).await {
                Ok(n) => sent += n,
                Err(e) => {
                    error!(error = %e, "request could not be built");
                    return LoopExit::Failed;
                }
            }

            if !cool_down.is_zero() {
                let more = mode.request_limit().is_none_or(|limit| sent < limit);
                if more {
                    tokio::select! {
                        _ = tokio::time::sleep(cool_down) => {}
                        _ = cancel.cancelled() => return LoopExit::Cancelled,
                    }
                }
            }
        }
    }
}

#[async_trait]
impl IterationExecutor for HttpIterationExecutor {
    async fn execute(&self, run: IterationRun, cancel: &CancellationToken) -> CommandStatus {
        if let Err(e) = run.command.transition(CommandStatus::Ongoing) {
            error!(error = %e, "command could not start");
            return run.command.status();
        }
        debug!(iteration = %run.iteration.name(), command_id = %run.command.id(), "command started");

        let final_status = match self.run_loop(&run, cancel).await {
            LoopExit::Completed => CommandStatus::Completed,
            LoopExit::Cancelled => CommandStatus::Cancelled,
            LoopExit::Terminated => CommandStatus::Terminated,
            LoopExit::Failed => CommandStatus::Failed,
        };
        if let Err(e) = run.command.transition(final_status) {
            error!(error = %e, "command could not finish");
        }

        info!(
            iteration = %run.iteration.name(),
            command_id = %run.command.id(),
            status = %final_status,
            successful = run.command.successful_requests(),
            failed = run.command.failed_requests(),
            "command finished"
        );
        run.command.status()
    }
}
