//! Round execution: client waves, arrival staggering and concurrency.

use futures::future::join_all;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::IterationScheduler;
use crate::client::{ClientConfiguration, ClientManager};
use crate::domain::{CommandStatus, ExecutionCommand, HttpIteration, Round};
use crate::error::ExecutionError;
use crate::monitor::CommandStatusMonitor;

/// Final status of one command of a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub iteration_id: Uuid,
    pub command_id: Uuid,
    pub wave: u32,
    pub status: CommandStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundSummary {
    pub round_id: Uuid,
    pub commands: Vec<CommandOutcome>,
}

impl RoundSummary {
    pub fn count(&self, status: CommandStatus) -> usize {
        self.commands.iter().filter(|c| c.status == status).count()
    }
}

/// One client's share of a round: every valid iteration of the round.
struct Wave {
    index: u32,
    units: Vec<(Arc<HttpIteration>, Arc<ExecutionCommand>)>,
}

/// Drives a round: one wave per simulated client, wave `i` arriving
/// `i * arrival_delay` after its reference time.
///
/// In parallel mode the reference time is taken once, so waves start at
/// fixed offsets from the round start and all of them, and the iterations
/// within each, run concurrently. Otherwise each wave's reference time is
/// taken when the previous wave has finished, and every dispatch is
/// awaited before the next one starts.
///
/// Every command of the round is registered with the
/// [`CommandStatusMonitor`] before the first one is dispatched. Each
/// dispatched iteration gets its own pooled client.
pub struct RoundExecutor {
    pool: Arc<ClientManager>,
    client_config: ClientConfiguration,
    commands: Arc<CommandStatusMonitor>,
    scheduler: Arc<IterationScheduler>,
}

impl RoundExecutor {
    pub fn new(
        pool: Arc<ClientManager>,
        client_config: ClientConfiguration,
        commands: Arc<CommandStatusMonitor>,
        scheduler: Arc<IterationScheduler>,
    ) -> Self {
        Self {
            pool,
            client_config,
            commands,
            scheduler,
        }
    }

    pub async fn execute(
        &self,
        round: &Round,
        cancel: &CancellationToken,
    ) -> Result<RoundSummary, ExecutionError> {
        let mut summary = RoundSummary {
            round_id: round.id(),
            commands: Vec::new(),
        };
        if !round.is_valid() {
            warn!(round = %round.name(), errors = ?round.validation_errors(), "skipping invalid round");
            return Ok(summary);
        }

        let iterations: Vec<Arc<HttpIteration>> = round
            .iterations()
            .iter()
            .filter(|it| {
                if !it.is_valid() {
                    warn!(round = %round.name(), iteration = %it.name(), errors = ?it.validation_errors(), "skipping invalid iteration");
                }
                it.is_valid()
            })
            .cloned()
            .collect();
        if iterations.is_empty() {
            return Ok(summary);
        }

        if !round.startup_delay().is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(round.startup_delay()) => {}
                _ = cancel.cancelled() => {
                    warn!(round = %round.name(), "cancelled during startup delay");
                    return Ok(summary);
                }
            }
        }

        if !round.delay_client_creation_until_needed() {
            let missing = (round.number_of_clients() as usize).saturating_sub(self.pool.len());
            for _ in 0..missing {
                self.pool.create_and_queue_client(&self.client_config)?;
            }
        }

        let waves: Vec<Wave> = (0..round.number_of_clients())
            .map(|index| Wave {
                index,
                units: iterations
                    .iter()
                    .map(|it| {
                        let command = Arc::new(ExecutionCommand::scheduled(it.id()));
                        self.commands.register(command.clone(), it);
                        (it.clone(), command)
                    })
                    .collect(),
            })
            .collect();
        let registered: Vec<Arc<ExecutionCommand>> = waves
            .iter()
            .flat_map(|w| w.units.iter().map(|(_, command)| command.clone()))
            .collect();

        info!(
            round = %round.name(),
            clients = round.number_of_clients(),
            iterations = iterations.len(),
            parallel = round.run_in_parallel(),
            "round started"
        );

        let arrival_delay = round.arrival_delay();
        let dispatched = if round.run_in_parallel() {
            let base = Instant::now();
            let runs = waves.into_iter().map(|wave| {
                let at = base + arrival_delay * wave.index;
                self.run_wave(wave, at, true, cancel)
            });
            join_all(runs)
                .await
                .into_iter()
                .try_for_each(|outcomes| outcomes.map(|o| summary.commands.extend(o)))
        } else {
            let mut dispatched = Ok(());
            for wave in waves {
                let at = Instant::now() + arrival_delay * wave.index;
                match self.run_wave(wave, at, false, cancel).await {
                    Ok(outcomes) => summary.commands.extend(outcomes),
                    Err(e) => {
                        dispatched = Err(e);
                        break;
                    }
                }
            }
            dispatched
        };

        if let Err(e) = dispatched {
            let abandoned = registered
                .iter()
                .filter(|c| c.status() == CommandStatus::Scheduled)
                .filter(|c| c.try_transition(CommandStatus::Failed))
                .count();
            warn!(round = %round.name(), error = %e, abandoned, "round aborted");
            return Err(e);
        }

        info!(
            round = %round.name(),
            completed = summary.count(CommandStatus::Completed),
            terminated = summary.count(CommandStatus::Terminated),
            cancelled = summary.count(CommandStatus::Cancelled),
            failed = summary.count(CommandStatus::Failed),
            "round finished"
        );
        Ok(summary)
    }

    async fn run_wave(
        &self,
        wave: Wave,
        at: Instant,
        parallel: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<CommandOutcome>, ExecutionError> {
        if parallel {
            let runs = wave
                .units
                .iter()
                .map(|(it, command)| self.dispatch(wave.index, at, it, command, cancel));
            return join_all(runs).await.into_iter().collect();
        }

        let mut outcomes = Vec::with_capacity(wave.units.len());
        for (it, command) in &wave.units {
            outcomes.push(self.dispatch(wave.index, at, it, command, cancel).await?);
        }
        Ok(outcomes)
    }

    async fn dispatch(
        &self,
        wave: u32,
        at: Instant,
        iteration: &Arc<HttpIteration>,
        command: &Arc<ExecutionCommand>,
        cancel: &CancellationToken,
    ) -> Result<CommandOutcome, ExecutionError> {
        let dequeued = self
            .pool
            .dequeue_client_for(&self.client_config, true)
            .and_then(|client| {
                client.ok_or_else(|| ExecutionError::ClientBuild {
                    message: "no pooled client available".to_string(),
                })
            });
        let client = match dequeued {
            Ok(client) => client,
            Err(e) => {
                command.try_transition(CommandStatus::Failed);
                return Err(e);
            }
        };

        let status = self
            .scheduler
            .schedule(at, iteration.clone(), command.clone(), client.clone(), cancel)
            .await;
        self.pool.release(client);
        Ok(CommandOutcome {
            iteration_id: iteration.id(),
            command_id: command.id(),
            wave,
            status: status?,
        })
    }
}
