//! Service implementations backed by this node's own state.
//!
//! These are what the RPC server exposes. They never fan out to other
//! nodes, so a master answering a worker cannot loop back into the cluster.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::rpc::{IterationTerminationService, MetricsQueryService, MonitorService};
use super::EntityDiscovery;
use crate::domain::CommandStatus;
use crate::error::RpcError;
use crate::metrics::{
    DataTransmissionMetrics, DurationMetrics, IterationMetrics, MetricsRegistry,
    ResponseCodeMetrics, ThroughputMetrics,
};
use crate::monitor::{CommandStatusMonitor, TerminationCheck};

fn resolve(discovery: &EntityDiscovery, fully_qualified_name: &str) -> Result<Uuid, RpcError> {
    discovery
        .find_by_name(fully_qualified_name)
        .map(|r| r.iteration_id)
        .ok_or_else(|| RpcError::NotFound {
            name: fully_qualified_name.to_string(),
        })
}

pub struct LocalMonitorService {
    discovery: Arc<EntityDiscovery>,
    commands: Arc<CommandStatusMonitor>,
}

impl LocalMonitorService {
    pub fn new(discovery: Arc<EntityDiscovery>, commands: Arc<CommandStatusMonitor>) -> Self {
        Self {
            discovery,
            commands,
        }
    }
}

#[async_trait]
impl MonitorService for LocalMonitorService {
    async fn query_iteration_statuses(
        &self,
        fully_qualified_name: &str,
    ) -> Result<Vec<CommandStatus>, RpcError> {
        let id = resolve(&self.discovery, fully_qualified_name)?;
        Ok(self.commands.local_statuses(id))
    }
}

/// Reads this node's [`MetricsRegistry`]. An iteration that is known but
/// has not recorded anything yet reads as empty metrics.
pub struct LocalMetricsQueryService {
    discovery: Arc<EntityDiscovery>,
    registry: Arc<MetricsRegistry>,
}

impl LocalMetricsQueryService {
    pub fn new(discovery: Arc<EntityDiscovery>, registry: Arc<MetricsRegistry>) -> Self {
        Self {
            discovery,
            registry,
        }
    }

    fn read<T: Default>(
        &self,
        fully_qualified_name: &str,
        f: impl FnOnce(&IterationMetrics) -> T,
    ) -> Result<T, RpcError> {
        let id = resolve(&self.discovery, fully_qualified_name)?;
        Ok(self
            .registry
            .get(id)
            .map(|m| f(m.as_ref()))
            .unwrap_or_default())
    }
}

#[async_trait]
impl MetricsQueryService for LocalMetricsQueryService {
    async fn get_duration_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DurationMetrics, RpcError> {
        self.read(fully_qualified_name, IterationMetrics::duration)
    }

    async fn get_response_code_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ResponseCodeMetrics, RpcError> {
        self.read(fully_qualified_name, IterationMetrics::response_codes)
    }

    async fn get_throughput_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ThroughputMetrics, RpcError> {
        self.read(fully_qualified_name, IterationMetrics::throughput)
    }

    async fn get_data_transmission_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DataTransmissionMetrics, RpcError> {
        self.read(fully_qualified_name, IterationMetrics::data_transmission)
    }
}

pub struct LocalTerminationService {
    discovery: Arc<EntityDiscovery>,
    checker: Arc<dyn TerminationCheck>,
}

impl LocalTerminationService {
    pub fn new(discovery: Arc<EntityDiscovery>, checker: Arc<dyn TerminationCheck>) -> Self {
        Self { discovery, checker }
    }
}

#[async_trait]
impl IterationTerminationService for LocalTerminationService {
    async fn is_terminated(&self, fully_qualified_name: &str) -> Result<bool, RpcError> {
        let id = resolve(&self.discovery, fully_qualified_name)?;
        let iteration = self
            .discovery
            .iteration(id)
            .ok_or_else(|| RpcError::NotFound {
                name: fully_qualified_name.to_string(),
            })?;
        Ok(self.checker.is_termination_required(&iteration).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{HttpIteration, Plan, PlanSetup};

    fn plan() -> Plan {
        let setup: PlanSetup = toml::from_str(
            r#"
            name = "p"
            [[round]]
            name = "r"
            number_of_clients = 1
            [[round.iteration]]
            name = "i"
            mode = { type = "request_count", count = 1 }
            request = { url = "http://localhost/" }
            "#,
        )
        .unwrap();
        Plan::from_setup(setup).unwrap()
    }

    #[tokio::test]
    async fn test_metrics_of_known_but_idle_iteration_are_empty() {
        let plan = plan();
        let discovery = Arc::new(EntityDiscovery::from_plan(&plan));
        let service = LocalMetricsQueryService::new(discovery, Arc::new(MetricsRegistry::new()));

        let codes = service.get_response_code_metrics("p.r.i").await.unwrap();
        assert_eq!(codes.total(), 0);
        assert!(matches!(
            service.get_duration_metrics("p.r.x").await,
            Err(RpcError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_metrics_read_from_registry() {
        let plan = plan();
        let discovery = Arc::new(EntityDiscovery::from_plan(&plan));
        let registry = Arc::new(MetricsRegistry::new());
        let iteration = plan.iterations().next().unwrap();
        registry.monitor(iteration).update_response_code(201, "Created");

        let service = LocalMetricsQueryService::new(discovery, registry);
        let codes = service.get_response_code_metrics("p.r.i").await.unwrap();
        assert_eq!(codes.summaries[0].status_code, 201);
    }

    struct Always(bool);

    #[async_trait]
    impl TerminationCheck for Always {
        async fn is_termination_required(&self, _: &HttpIteration) -> bool {
            self.0
        }
    }

    #[tokio::test]
    async fn test_termination_resolves_iteration() {
        let plan = plan();
        let discovery = Arc::new(EntityDiscovery::from_plan(&plan));
        let service = LocalTerminationService::new(discovery, Arc::new(Always(true)));
        assert!(service.is_terminated("p.r.i").await.unwrap());
        assert!(service.is_terminated("p.r.x").await.is_err());
    }
}
