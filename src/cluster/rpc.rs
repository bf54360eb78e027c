//! RPC service contracts shared by the local implementations, the HTTP
//! client and the HTTP server.
//!
//! All calls address iterations by fully-qualified name. Wire format is
//! JSON over HTTP:
//!
//! | Route                                   | Request         | Response              |
//! |-----------------------------------------|-----------------|-----------------------|
//! | `POST /rpc/monitor/iteration-statuses`  | [`EntityQuery`] | [`StatusesResponse`]  |
//! | `POST /rpc/metrics/duration`            | [`EntityQuery`] | `DurationMetrics`     |
//! | `POST /rpc/metrics/response-codes`      | [`EntityQuery`] | `ResponseCodeMetrics` |
//! | `POST /rpc/metrics/throughput`          | [`EntityQuery`] | `ThroughputMetrics`   |
//! | `POST /rpc/metrics/data-transmission`   | [`EntityQuery`] | `DataTransmissionMetrics` |
//! | `POST /rpc/termination/is-terminated`   | [`EntityQuery`] | [`TerminationResponse`] |
//! | `GET /rpc/health`                       |                 | [`HealthResponse`]    |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::NodeMetadata;
use crate::domain::CommandStatus;
use crate::error::RpcError;
use crate::metrics::{
    DataTransmissionMetrics, DurationMetrics, ResponseCodeMetrics, ThroughputMetrics,
};

pub const MONITOR_STATUSES_PATH: &str = "/rpc/monitor/iteration-statuses";
pub const METRICS_DURATION_PATH: &str = "/rpc/metrics/duration";
pub const METRICS_RESPONSE_CODES_PATH: &str = "/rpc/metrics/response-codes";
pub const METRICS_THROUGHPUT_PATH: &str = "/rpc/metrics/throughput";
pub const METRICS_DATA_TRANSMISSION_PATH: &str = "/rpc/metrics/data-transmission";
pub const TERMINATION_PATH: &str = "/rpc/termination/is-terminated";
pub const HEALTH_PATH: &str = "/rpc/health";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityQuery {
    pub fully_qualified_name: String,
}

impl EntityQuery {
    pub fn new(fully_qualified_name: impl Into<String>) -> Self {
        Self {
            fully_qualified_name: fully_qualified_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusesResponse {
    pub statuses: Vec<CommandStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationResponse {
    pub terminated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
}

/// Error body returned with non-2xx RPC responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub error: String,
}

/// Reports the statuses of the commands a node holds for an iteration.
#[async_trait]
pub trait MonitorService: Send + Sync {
    async fn query_iteration_statuses(
        &self,
        fully_qualified_name: &str,
    ) -> Result<Vec<CommandStatus>, RpcError>;
}

/// Reads an iteration's metrics by kind.
#[async_trait]
pub trait MetricsQueryService: Send + Sync {
    async fn get_duration_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DurationMetrics, RpcError>;

    async fn get_response_code_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ResponseCodeMetrics, RpcError>;

    async fn get_throughput_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ThroughputMetrics, RpcError>;

    async fn get_data_transmission_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DataTransmissionMetrics, RpcError>;
}

/// Answers whether an iteration's termination rules have tripped.
#[async_trait]
pub trait IterationTerminationService: Send + Sync {
    async fn is_terminated(&self, fully_qualified_name: &str) -> Result<bool, RpcError>;
}

/// Hands out service clients for a remote node.
#[async_trait]
pub trait NodeConnector: Send + Sync {
    fn monitor(&self, node: &NodeMetadata) -> Arc<dyn MonitorService>;

    fn metrics(&self, node: &NodeMetadata) -> Arc<dyn MetricsQueryService>;

    fn termination(&self, node: &NodeMetadata) -> Arc<dyn IterationTerminationService>;

    /// Liveness probe.
    async fn ping(&self, node: &NodeMetadata) -> Result<(), RpcError>;
}
