//! Cluster-wide metrics reads.

use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

use super::rpc::{MetricsQueryService, NodeConnector};
use super::{scatter, LocalMetricsQueryService, NodeMetadata, NodeRegistry, NodeType};
use crate::error::RpcError;
use crate::metrics::{
    DataTransmissionMetrics, DurationMetrics, IterationSnapshot, ResponseCodeMetrics,
    ThroughputMetrics,
};

/// Reads every metric kind of one iteration through `service`.
pub async fn collect_snapshot(
    service: &dyn MetricsQueryService,
    iteration_id: Uuid,
    fully_qualified_name: &str,
) -> Result<IterationSnapshot, RpcError> {
    let (duration, response_codes, throughput, data_transmission) = tokio::try_join!(
        service.get_duration_metrics(fully_qualified_name),
        service.get_response_code_metrics(fully_qualified_name),
        service.get_throughput_metrics(fully_qualified_name),
        service.get_data_transmission_metrics(fully_qualified_name),
    )?;
    Ok(IterationSnapshot {
        iteration_id,
        duration,
        response_codes,
        throughput,
        data_transmission,
    })
}

/// [`MetricsQueryService`] that merges this node's metrics with every
/// active worker's when running on the master. On a worker it answers
/// from local state only.
pub struct ClusterMetricsQuery {
    local: LocalMetricsQueryService,
    nodes: Arc<NodeRegistry>,
    connector: Arc<dyn NodeConnector>,
}

impl ClusterMetricsQuery {
    pub fn new(
        local: LocalMetricsQueryService,
        nodes: Arc<NodeRegistry>,
        connector: Arc<dyn NodeConnector>,
    ) -> Self {
        Self {
            local,
            nodes,
            connector,
        }
    }

    fn workers(&self) -> Vec<NodeMetadata> {
        if self.nodes.is_master() {
            self.nodes.active_nodes(NodeType::Worker)
        } else {
            Vec::new()
        }
    }
}

#[async_trait]
impl MetricsQueryService for ClusterMetricsQuery {
    async fn get_duration_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DurationMetrics, RpcError> {
        let local = self.local.get_duration_metrics(fully_qualified_name).await?;
        let remote = scatter(&self.workers(), |node| {
            let service = self.connector.metrics(&node);
            async move { service.get_duration_metrics(fully_qualified_name).await }
        })
        .await;
        Ok(DurationMetrics::merge(std::iter::once(&local).chain(&remote)))
    }

    async fn get_response_code_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ResponseCodeMetrics, RpcError> {
        let local = self
            .local
            .get_response_code_metrics(fully_qualified_name)
            .await?;
        let remote = scatter(&self.workers(), |node| {
            let service = self.connector.metrics(&node);
            async move { service.get_response_code_metrics(fully_qualified_name).await }
        })
        .await;
        Ok(ResponseCodeMetrics::merge(std::iter::once(&local).chain(&remote)))
    }

    async fn get_throughput_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ThroughputMetrics, RpcError> {
        let local = self
            .local
            .get_throughput_metrics(fully_qualified_name)
            .await?;
        let remote = scatter(&self.workers(), |node| {
            let service = self.connector.metrics(&node);
            async move { service.get_throughput_metrics(fully_qualified_name).await }
        })
        .await;
        Ok(ThroughputMetrics::merge(std::iter::once(&local).chain(&remote)))
    }

    async fn get_data_transmission_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DataTransmissionMetrics, RpcError> {
        let local = self
            .local
            .get_data_transmission_metrics(fully_qualified_name)
            .await?;
        let remote = scatter(&self.workers(), |node| {
            let service = self.connector.metrics(&node);
            async move {
                service
                    .get_data_transmission_metrics(fully_qualified_name)
                    .await
            }
        })
        .await;
        Ok(DataTransmissionMetrics::merge(
            std::iter::once(&local).chain(&remote),
        ))
    }
}
