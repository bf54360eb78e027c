//! Round and plan execution against a mock HTTP target.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use stresslab::client::{ClientConfiguration, ClientManager};
use stresslab::cluster::{
    EntityDiscovery, HttpNodeConnector, IterationTerminationService, LocalMetricsQueryService,
    MetricsQueryService, NodeRegistry, RetryPolicy,
};
use stresslab::domain::{CommandStatus, EntityExecutionStatus, HttpIteration, Plan, PlanSetup};
use stresslab::error::RpcError;
use stresslab::execution::{
    HttpIterationExecutor, IterationScheduler, PlanExecutor, RoundExecutor,
};
use stresslab::metrics::MetricsRegistry;
use stresslab::monitor::{
    CommandStatusMonitor, FailureCheck, FailureEvaluator, IterationStatusMonitor,
    TerminationChecker,
};
use stresslab::template::VariableResolver;

/// Termination service whose answer the test flips.
#[derive(Default)]
struct Switch(AtomicBool);

#[async_trait]
impl IterationTerminationService for Switch {
    async fn is_terminated(&self, _: &str) -> Result<bool, RpcError> {
        Ok(self.0.load(Ordering::SeqCst))
    }
}

struct Harness {
    plan: Plan,
    registry: Arc<MetricsRegistry>,
    commands: Arc<CommandStatusMonitor>,
    rounds: Arc<RoundExecutor>,
    statuses: IterationStatusMonitor,
    failure: Arc<FailureEvaluator>,
    cancel: CancellationToken,
}

impl Harness {
    fn new(plan_toml: &str, target: &str, termination: Arc<dyn IterationTerminationService>) -> Self {
        let setup: PlanSetup = toml::from_str(plan_toml).unwrap();
        let plan = Plan::from_setup(setup).unwrap();
        let discovery = Arc::new(EntityDiscovery::from_plan(&plan));
        let nodes = Arc::new(NodeRegistry::standalone("local"));
        let cancel = CancellationToken::new();
        let connector = Arc::new(
            HttpNodeConnector::new(Duration::from_secs(1), RetryPolicy::none(), cancel.clone())
                .unwrap(),
        );
        let registry = Arc::new(MetricsRegistry::new());
        let metrics: Arc<dyn MetricsQueryService> = Arc::new(LocalMetricsQueryService::new(
            discovery.clone(),
            registry.clone(),
        ));
        let commands = Arc::new(CommandStatusMonitor::new(
            discovery.clone(),
            nodes,
            connector,
        ));
        let checker = Arc::new(TerminationChecker::new(discovery.clone(), metrics.clone()));
        let failure = Arc::new(FailureEvaluator::new(
            commands.clone(),
            discovery.clone(),
            metrics,
        ));
        let executor = Arc::new(HttpIterationExecutor::new(
            Arc::new(VariableResolver::new(BTreeMap::from([(
                "target".to_string(),
                target.to_string(),
            )]))),
            discovery,
            termination,
        ));
        let scheduler = Arc::new(IterationScheduler::new(
            registry.clone(),
            checker.clone(),
            executor,
        ));
        let rounds = Arc::new(RoundExecutor::new(
            Arc::new(ClientManager::new()),
            ClientConfiguration::default(),
            commands.clone(),
            scheduler,
        ));
        let statuses = IterationStatusMonitor::new(
            cancel.clone(),
            checker,
            failure.clone(),
            commands.clone(),
        );
        Self {
            plan,
            registry,
            commands,
            rounds,
            statuses,
            failure,
            cancel,
        }
    }

    fn iteration(&self) -> Arc<HttpIteration> {
        self.plan.rounds()[0].iterations()[0].clone()
    }
}

const STAGGERED_ROUND: &str = r#"
name = "e2e"

[[round]]
name = "staggered"
number_of_clients = 3
arrival_delay_ms = 100
run_in_parallel = true

[[round.iteration]]
name = "single"
mode = { type = "request_count", count = 1 }
request = { url = "${target}/hit" }
"#;

#[tokio::test]
async fn test_staggered_parallel_round_completes_every_wave() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/hit")
        .with_status(200)
        .with_body("ok")
        .expect(3)
        .create_async()
        .await;

    let h = Harness::new(STAGGERED_ROUND, &server.url(), Arc::new(Switch::default()));
    let started = std::time::Instant::now();
    let summary = h
        .rounds
        .execute(&h.plan.rounds()[0], &h.cancel)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    mock.assert_async().await;
    assert_eq!(summary.commands.len(), 3);
    assert_eq!(summary.count(CommandStatus::Completed), 3);
    let mut waves: Vec<u32> = summary.commands.iter().map(|c| c.wave).collect();
    waves.sort_unstable();
    assert_eq!(waves, vec![0, 1, 2]);
    // The last wave starts 200ms after the first.
    assert!(elapsed >= Duration::from_millis(200), "{elapsed:?}");

    let it = h.iteration();
    let snapshot = h.registry.snapshot(it.id()).unwrap();
    assert_eq!(snapshot.response_codes.total(), 3);
    assert_eq!(snapshot.throughput.successful_connections, 3);
    assert_eq!(h.statuses.status(&it).await, EntityExecutionStatus::Success);
}

#[tokio::test]
async fn test_sequential_batched_round() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/orders")
        .match_body(mockito::Matcher::Regex("^order-".to_string()))
        .with_status(201)
        .expect(8)
        .create_async()
        .await;

    let h = Harness::new(
        r#"
name = "e2e"

[[round]]
name = "batched"
number_of_clients = 2

[[round.iteration]]
name = "create"
maximize_throughput = true
mode = { type = "request_count_batched", count = 4, batch_size = 2, cool_down_ms = 10 }
request = { method = "POST", url = "${target}/orders", body = "order-${uuid}" }
"#,
        &server.url(),
        Arc::new(Switch::default()),
    );
    let summary = PlanExecutor::new(h.rounds.clone())
        .execute(&h.plan, &h.cancel)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(summary.rounds.len(), 1);
    assert_eq!(summary.rounds[0].count(CommandStatus::Completed), 2);
    let commands = h.commands.commands(h.iteration().id());
    assert!(commands.iter().all(|c| c.successful_requests() == 4));
}

#[tokio::test]
async fn test_termination_service_stops_duration_iteration() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/slow")
        .with_status(503)
        .create_async()
        .await;

    let switch = Arc::new(Switch::default());
    let h = Harness::new(
        r#"
name = "e2e"

[[round]]
name = "long"
number_of_clients = 1

[[round.iteration]]
name = "soak"
mode = { type = "duration", duration_ms = 60000 }
request = { url = "${target}/slow" }

[[round.iteration.termination_rule]]
max_error_rate = 0.5
grace_period_ms = 100
error_status_codes = [503]
"#,
        &server.url(),
        switch.clone(),
    );

    let flip = {
        let switch = switch.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            switch.0.store(true, Ordering::SeqCst);
        })
    };
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        h.rounds.execute(&h.plan.rounds()[0], &h.cancel),
    )
    .await
    .unwrap()
    .unwrap();
    flip.await.unwrap();

    assert_eq!(summary.count(CommandStatus::Terminated), 1);
    assert_eq!(
        h.statuses.status(&h.iteration()).await,
        EntityExecutionStatus::Terminated
    );
}

#[tokio::test]
async fn test_cancellation_stops_running_round() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/hit")
        .with_status(200)
        .create_async()
        .await;

    let h = Harness::new(
        r#"
name = "e2e"

[[round]]
name = "endless"
number_of_clients = 2
run_in_parallel = true

[[round.iteration]]
name = "loop"
mode = { type = "batched", batch_size = 1, cool_down_ms = 20 }
request = { url = "${target}/hit" }
"#,
        &server.url(),
        Arc::new(Switch::default()),
    );

    let cancel = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
    });
    let summary = tokio::time::timeout(
        Duration::from_secs(10),
        h.rounds.execute(&h.plan.rounds()[0], &h.cancel),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.count(CommandStatus::Cancelled), 2);
    assert_eq!(
        h.statuses.status(&h.iteration()).await,
        EntityExecutionStatus::Cancelled
    );
}

const FAILURE_PLAN: &str = r#"
name = "e2e"

[[round]]
name = "judged"
number_of_clients = 1

[[round.iteration]]
name = "rated"
mode = { type = "request_count", count = 10 }
request = { url = "http://localhost/rated" }
failure_criteria = { max_error_rate = 0.5, error_status_codes = [500] }
"#;

fn record_codes(h: &Harness, errors: u32, ok: u32) {
    let metrics = h.registry.monitor(&h.iteration());
    for _ in 0..errors {
        metrics.update_response_code(500, "Internal Server Error");
    }
    for _ in 0..ok {
        metrics.update_response_code(200, "OK");
    }
}

#[tokio::test]
async fn test_error_rate_above_ceiling_fails() {
    let h = Harness::new(FAILURE_PLAN, "", Arc::new(Switch::default()));
    record_codes(&h, 6, 4);
    assert!(
        h.failure
            .is_error_rate_exceeded(&h.iteration(), &h.cancel)
            .await
    );
    assert_eq!(
        h.statuses.status(&h.iteration()).await,
        EntityExecutionStatus::Failed
    );
}

#[tokio::test]
async fn test_error_rate_below_ceiling_passes() {
    let h = Harness::new(FAILURE_PLAN, "", Arc::new(Switch::default()));
    record_codes(&h, 4, 6);
    assert!(
        !h.failure
            .is_error_rate_exceeded(&h.iteration(), &h.cancel)
            .await
    );
    assert_eq!(
        h.statuses.status(&h.iteration()).await,
        EntityExecutionStatus::Success
    );
}

#[tokio::test]
async fn test_failure_deferred_while_commands_active() {
    let h = Harness::new(FAILURE_PLAN, "", Arc::new(Switch::default()));
    record_codes(&h, 10, 0);
    let it = h.iteration();
    let command = Arc::new(stresslab::domain::ExecutionCommand::scheduled(it.id()));
    h.commands.register(command.clone(), &it);

    assert!(!h.failure.is_error_rate_exceeded(&it, &h.cancel).await);
    assert_eq!(h.statuses.status(&it).await, EntityExecutionStatus::Scheduled);

    command.transition(CommandStatus::Ongoing).unwrap();
    assert!(!h.failure.is_error_rate_exceeded(&it, &h.cancel).await);

    command.transition(CommandStatus::Completed).unwrap();
    assert!(h.failure.is_error_rate_exceeded(&it, &h.cancel).await);
}

const TWO_ROUNDS: &str = r#"
name = "e2e"

[[round]]
name = "first"
number_of_clients = 1

[[round.iteration]]
name = "one"
mode = { type = "request_count", count = 1 }
request = { url = "http://localhost/one" }

[[round]]
name = "second"
number_of_clients = 1

[[round.iteration]]
name = "two"
mode = { type = "request_count", count = 1 }
request = { url = "http://localhost/two" }
"#;

#[tokio::test]
async fn test_cancelled_plan_skips_remaining_rounds() {
    let h = Harness::new(TWO_ROUNDS, "", Arc::new(Switch::default()));
    h.cancel.cancel();

    let summary = PlanExecutor::new(h.rounds.clone())
        .execute(&h.plan, &h.cancel)
        .await
        .unwrap();

    assert!(summary.rounds.is_empty());
    assert_eq!(summary.skipped_rounds, 2);
    assert_eq!(summary.plan_id, h.plan.id());
}

#[tokio::test]
async fn test_plan_without_valid_round_is_rejected() {
    let h = Harness::new(
        r#"
name = "e2e"

[[round]]
name = "idle"
number_of_clients = 0

[[round.iteration]]
name = "never"
mode = { type = "request_count", count = 1 }
request = { url = "http://localhost/never" }
"#,
        "",
        Arc::new(Switch::default()),
    );

    let err = PlanExecutor::new(h.rounds.clone())
        .execute(&h.plan, &h.cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, stresslab::ExecutionError::NothingToRun { .. }));
    assert!(h.commands.commands(h.iteration().id()).is_empty());
}
