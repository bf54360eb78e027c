//! Process wiring: builds every component from a [`StressConfig`], serves
//! the RPC (and, on a master, operator) routes, runs the plan and collects
//! the run report.

use axum::Router;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::ClientManager;
use crate::cluster::{
    collect_snapshot, run_health_probe, server, ClusterMetricsQuery, EntityDiscovery,
    HttpNodeConnector, IterationTerminationService, LocalMetricsQueryService,
    LocalMonitorService, LocalTerminationService, MetricsQueryService, NodeConnector,
    NodeRegistry, RpcState,
};
use crate::config::StressConfig;
use crate::domain::Plan;
use crate::error::{ConfigError, StressError};
use crate::execution::{
    HttpIterationExecutor, IterationScheduler, PlanExecutor, RoundExecutor,
};
use crate::http_api::{self, ApiState};
use crate::metrics::{IterationMetrics, MetricsRegistry};
use crate::monitor::{CommandStatusMonitor, FailureEvaluator, IterationStatusMonitor, TerminationChecker};
use crate::report::{IterationReport, RoundReport, RunReport};
use crate::template::VariableResolver;

/// How often the master polls for commands still running cluster-wide.
const QUIESCENCE_POLL: Duration = Duration::from_millis(500);

/// Every long-lived component of one node.
pub struct Engine {
    config: StressConfig,
    plan: Arc<Plan>,
    discovery: Arc<EntityDiscovery>,
    nodes: Arc<NodeRegistry>,
    connector: Arc<dyn NodeConnector>,
    registry: Arc<MetricsRegistry>,
    commands: Arc<CommandStatusMonitor>,
    metrics: Arc<dyn MetricsQueryService>,
    local_termination: Arc<LocalTerminationService>,
    statuses: Arc<IterationStatusMonitor>,
    executor: PlanExecutor,
    cancel: CancellationToken,
}

impl Engine {
    /// Builds the component graph. `cancel` is the run-wide token.
    pub fn build(config: StressConfig, cancel: CancellationToken) -> Result<Self, StressError> {
        let connector: Arc<dyn NodeConnector> = Arc::new(HttpNodeConnector::new(
            config.rpc.timeout(),
            config.rpc.retry_policy(),
            cancel.clone(),
        )?);
        Self::with_connector(config, connector, cancel)
    }

    /// Like [`Engine::build`] with a caller-supplied peer connector.
    pub fn with_connector(
        config: StressConfig,
        connector: Arc<dyn NodeConnector>,
        cancel: CancellationToken,
    ) -> Result<Self, StressError> {
        let plan = Arc::new(Plan::from_setup(config.plan.clone())?);
        let discovery = Arc::new(EntityDiscovery::from_plan(&plan));
        let nodes = Arc::new(config.node_registry());
        let registry = Arc::new(MetricsRegistry::new());

        let commands = Arc::new(CommandStatusMonitor::new(
            discovery.clone(),
            nodes.clone(),
            connector.clone(),
        ));
        let metrics: Arc<dyn MetricsQueryService> = Arc::new(ClusterMetricsQuery::new(
            LocalMetricsQueryService::new(discovery.clone(), registry.clone()),
            nodes.clone(),
            connector.clone(),
        ));
        let termination = Arc::new(TerminationChecker::new(discovery.clone(), metrics.clone()));
        let local_termination = Arc::new(LocalTerminationService::new(
            discovery.clone(),
            termination.clone(),
        ));
        let failure = Arc::new(FailureEvaluator::new(
            commands.clone(),
            discovery.clone(),
            metrics.clone(),
        ));
        let statuses = Arc::new(IterationStatusMonitor::new(
            cancel.clone(),
            termination.clone(),
            failure,
            commands.clone(),
        ));

        // Workers defer termination decisions to the master.
        let decider: Arc<dyn IterationTerminationService> = if nodes.is_master() {
            local_termination.clone()
        } else {
            let master = nodes.master().ok_or_else(|| {
                ConfigError::validation("a worker needs cluster.master_url")
            })?;
            connector.termination(&master)
        };

        let executor = Arc::new(HttpIterationExecutor::new(
            Arc::new(VariableResolver::new(config.variables.clone())),
            discovery.clone(),
            decider,
        ));
        let scheduler = Arc::new(IterationScheduler::new(
            registry.clone(),
            termination,
            executor,
        ));
        let rounds = Arc::new(RoundExecutor::new(
            Arc::new(ClientManager::new()),
            config.client.clone(),
            commands.clone(),
            scheduler,
        ));

        Ok(Self {
            config,
            plan,
            discovery,
            nodes,
            connector,
            registry,
            commands,
            metrics,
            local_termination,
            statuses,
            executor: PlanExecutor::new(rounds),
            cancel,
        })
    }

    pub fn plan(&self) -> &Arc<Plan> {
        &self.plan
    }

    pub fn nodes(&self) -> &Arc<NodeRegistry> {
        &self.nodes
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    /// RPC routes, plus the operator API on a master.
    pub fn router(&self) -> Router {
        let rpc = server::router(Arc::new(RpcState {
            node_id: self.nodes.local_node().node_id.clone(),
            monitor: Arc::new(LocalMonitorService::new(
                self.discovery.clone(),
                self.commands.clone(),
            )),
            metrics: Arc::new(LocalMetricsQueryService::new(
                self.discovery.clone(),
                self.registry.clone(),
            )),
            termination: self.local_termination.clone(),
        }));
        if !self.nodes.is_master() {
            return rpc;
        }
        rpc.merge(http_api::router(Arc::new(ApiState {
            plan: self.plan.clone(),
            discovery: self.discovery.clone(),
            statuses: self.statuses.clone(),
            metrics: self.metrics.clone(),
        })))
    }

    /// Runs the plan and evaluates every iteration's terminal status.
    ///
    /// On a master the evaluation waits (up to `node.linger_ms`) for
    /// commands still running on workers.
    pub async fn execute(&self) -> Result<RunReport, StressError> {
        let started = Instant::now();
        let summary = self.executor.execute(&self.plan, &self.cancel).await?;

        if self.nodes.is_master() && !self.nodes.peers().is_empty() {
            self.await_quiescence(self.config.node.linger()).await;
        }

        Ok(self
            .collect_report(
                started.elapsed().as_secs_f64(),
                self.cancel.is_cancelled() || summary.skipped_rounds > 0,
            )
            .await)
    }

    async fn await_quiescence(&self, limit: Duration) {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let running = self
                .commands
                .query_where(|it| it.is_valid())
                .await
                .values()
                .flatten()
                .any(|s| s.is_active());
            if !running {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(?limit, "commands still running on workers, evaluating anyway");
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(QUIESCENCE_POLL) => {}
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    /// Terminal status and cluster-wide metrics of every valid iteration.
    pub async fn collect_report(&self, elapsed_secs: f64, cancelled: bool) -> RunReport {
        let mut rounds = Vec::with_capacity(self.plan.rounds().len());
        for round in self.plan.rounds() {
            let mut iterations = Vec::new();
            for it in round.iterations().iter().filter(|it| it.is_valid()) {
                let Some(record) = self.discovery.find_by_id(it.id()) else {
                    continue;
                };
                let metrics = match collect_snapshot(
                    self.metrics.as_ref(),
                    it.id(),
                    &record.fully_qualified_name,
                )
                .await
                {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(iteration = %record.fully_qualified_name, error = %e, "falling back to local metrics");
                        self.registry
                            .snapshot(it.id())
                            .unwrap_or_else(|| IterationMetrics::new(it.id()).snapshot())
                    }
                };
                iterations.push(IterationReport {
                    iteration_id: it.id(),
                    fully_qualified_name: record.fully_qualified_name,
                    status: self.statuses.status(it).await,
                    metrics,
                });
            }
            rounds.push(RoundReport {
                round_id: round.id(),
                name: round.name().to_string(),
                iterations,
            });
        }

        RunReport::new(
            self.plan.id(),
            self.plan.name(),
            self.nodes.local_node().node_id.clone(),
            elapsed_secs,
            cancelled,
            rounds,
        )
    }
}

/// Runs one node end to end: bind, serve, execute, linger, stop.
pub async fn run(config: StressConfig, cancel: CancellationToken) -> Result<RunReport, StressError> {
    let engine = Engine::build(config.clone(), cancel.clone())?;

    let listener = TcpListener::bind(&config.node.listen).await?;
    let addr = listener.local_addr()?;
    let stop = cancel.child_token();
    let server = {
        let app = engine.router();
        let stop = stop.clone();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(stop.cancelled_owned())
                .await
        })
    };
    info!(
        node_id = %config.node.node_id,
        role = %config.node.role,
        %addr,
        "node listening"
    );

    if engine.nodes().is_master() && !engine.nodes().peers().is_empty() {
        tokio::spawn(run_health_probe(
            engine.nodes().clone(),
            engine.connector.clone(),
            config.cluster.health_interval(),
            stop.clone(),
        ));
    }

    let outcome = engine.execute().await;

    if outcome.is_ok() && !engine.nodes().is_master() {
        info!(linger = ?config.node.linger(), "plan finished, serving final statuses");
        tokio::select! {
            _ = tokio::time::sleep(config.node.linger()) => {}
            _ = cancel.cancelled() => {}
        }
    }

    stop.cancel();
    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "server stopped with an error"),
        Err(e) => warn!(error = %e, "server task panicked"),
    }

    outcome
}
