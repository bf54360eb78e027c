//! Timed dispatch of one command.

use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{IterationExecutor, IterationRun};
use crate::client::HttpClient;
use crate::domain::{CommandStatus, ExecutionCommand, HttpIteration};
use crate::error::ExecutionError;
use crate::metrics::MetricsRegistry;
use crate::monitor::TerminationChecker;

/// Keeps an iteration monitored for as long as one execution runs.
struct MonitorGuard<'a> {
    registry: &'a MetricsRegistry,
    termination: &'a TerminationChecker,
    iteration_id: Uuid,
}

impl Drop for MonitorGuard<'_> {
    fn drop(&mut self) {
        if self.registry.stop(self.iteration_id) {
            self.termination.release(self.iteration_id);
        }
    }
}

/// Waits for a command's start time, then runs it under metrics monitoring.
pub struct IterationScheduler {
    registry: Arc<MetricsRegistry>,
    termination: Arc<TerminationChecker>,
    executor: Arc<dyn IterationExecutor>,
}

impl IterationScheduler {
    pub fn new(
        registry: Arc<MetricsRegistry>,
        termination: Arc<TerminationChecker>,
        executor: Arc<dyn IterationExecutor>,
    ) -> Self {
        Self {
            registry,
            termination,
            executor,
        }
    }

    /// Runs `command` at `at` plus the iteration's own startup delay.
    ///
    /// The command must be `Scheduled`. Cancellation during either wait
    /// marks it `Cancelled` and returns without monitoring the iteration.
    /// Returns the command's final status.
    pub async fn schedule(
        &self,
        at: Instant,
        iteration: Arc<HttpIteration>,
        command: Arc<ExecutionCommand>,
        client: HttpClient,
        cancel: &CancellationToken,
    ) -> Result<CommandStatus, ExecutionError> {
        let status = command.status();
        if status != CommandStatus::Scheduled {
            return Err(ExecutionError::InvalidCommandState {
                command_id: command.id(),
                status,
            });
        }

        if !wait_until(at, cancel).await
            || !wait_until(Instant::now() + iteration.startup_delay(), cancel).await
        {
            warn!(
                iteration = %iteration.name(),
                command_id = %command.id(),
                "cancelled before start"
            );
            command.try_transition(CommandStatus::Cancelled);
            return Ok(command.status());
        }

        let metrics = self.registry.monitor(&iteration);
        let _guard = MonitorGuard {
            registry: &self.registry,
            termination: &self.termination,
            iteration_id: iteration.id(),
        };
        debug!(iteration = %iteration.name(), command_id = %command.id(), "dispatching");

        let run = IterationRun {
            iteration,
            command,
            client,
            metrics,
        };
        Ok(self.executor.execute(run, cancel).await)
    }
}

/// Sleeps until `deadline`. Returns `false` if cancelled first.
async fn wait_until(deadline: Instant, cancel: &CancellationToken) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    if deadline <= Instant::now() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep_until(deadline) => true,
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfiguration;
    use crate::cluster::{EntityDiscovery, LocalMetricsQueryService};
    use crate::domain::{HttpRequestSpec, IterationMode, IterationSetup};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct CountingExecutor {
        runs: AtomicU32,
    }

    #[async_trait]
    impl IterationExecutor for CountingExecutor {
        async fn execute(&self, run: IterationRun, _cancel: &CancellationToken) -> CommandStatus {
            self.runs.fetch_add(1, Ordering::SeqCst);
            assert_eq!(run.metrics.active_executions(), 1);
            run.command.transition(CommandStatus::Ongoing).unwrap();
            run.command.transition(CommandStatus::Completed).unwrap();
            CommandStatus::Completed
        }
    }

    fn iteration(startup_delay_ms: u64) -> Arc<HttpIteration> {
        Arc::new(HttpIteration::from_setup(IterationSetup {
            name: "it".to_string(),
            startup_delay_ms,
            mode: IterationMode::RequestCount { count: 1 },
            maximize_throughput: false,
            request: HttpRequestSpec {
                method: "GET".to_string(),
                url: "http://localhost/".to_string(),
                headers: Default::default(),
                body: None,
            },
            failure_criteria: Default::default(),
            termination_rules: vec![],
        }))
    }

    fn scheduler() -> (IterationScheduler, Arc<CountingExecutor>, Arc<MetricsRegistry>) {
        let registry = Arc::new(MetricsRegistry::new());
        let discovery = Arc::new(EntityDiscovery::new());
        let termination = Arc::new(TerminationChecker::new(
            discovery.clone(),
            Arc::new(LocalMetricsQueryService::new(discovery, registry.clone())),
        ));
        let executor = Arc::new(CountingExecutor {
            runs: AtomicU32::new(0),
        });
        (
            IterationScheduler::new(registry.clone(), termination, executor.clone()),
            executor,
            registry,
        )
    }

    fn client() -> HttpClient {
        HttpClient::build(&ClientConfiguration::default()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_after_arrival_and_startup_delay() {
        let (scheduler, executor, registry) = scheduler();
        let it = iteration(200);
        let command = Arc::new(ExecutionCommand::scheduled(it.id()));
        let started = Instant::now();

        let status = scheduler
            .schedule(
                started + Duration::from_millis(300),
                it.clone(),
                command,
                client(),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(status, CommandStatus::Completed);
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 1);
        assert!(!registry.is_monitored(it.id()));
        assert!(registry.get(it.id()).is_some());
    }

    #[tokio::test]
    async fn test_rejects_command_not_scheduled() {
        let (scheduler, executor, _) = scheduler();
        let it = iteration(0);
        let command = Arc::new(ExecutionCommand::new(it.id()));

        let err = scheduler
            .schedule(Instant::now(), it, command, client(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidCommandState { .. }));
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_wait_marks_cancelled() {
        let (scheduler, executor, registry) = scheduler();
        let it = iteration(0);
        let command = Arc::new(ExecutionCommand::scheduled(it.id()));
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let status = scheduler
            .schedule(
                Instant::now() + Duration::from_secs(60),
                it.clone(),
                command.clone(),
                client(),
                &cancel,
            )
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(status, CommandStatus::Cancelled);
        assert_eq!(command.status(), CommandStatus::Cancelled);
        assert_eq!(executor.runs.load(Ordering::SeqCst), 0);
        assert!(registry.get(it.id()).is_none());
    }
}
