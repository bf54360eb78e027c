//! HTTP client side of the RPC layer.
//!
//! [`RpcClient`] implements every service trait against one remote node.
//! Transient failures are retried with exponential backoff; the retry
//! policy and the cancellation token are fixed when the client is built.

use async_trait::async_trait;
use dashmap::DashMap;
use rand::prelude::*;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::rpc::{
    EntityQuery, HealthResponse, IterationTerminationService, MetricsQueryService,
    MonitorService, NodeConnector, StatusesResponse, TerminationResponse, HEALTH_PATH,
    METRICS_DATA_TRANSMISSION_PATH, METRICS_DURATION_PATH, METRICS_RESPONSE_CODES_PATH,
    METRICS_THROUGHPUT_PATH, MONITOR_STATUSES_PATH, TERMINATION_PATH,
};
use super::NodeMetadata;
use crate::domain::CommandStatus;
use crate::error::RpcError;
use crate::metrics::{
    DataTransmissionMetrics, DurationMetrics, ResponseCodeMetrics, ThroughputMetrics,
};

/// Retry settings for transient RPC failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_backoff: Duration::ZERO,
        }
    }

    /// Backoff before retry number `attempt` (zero-based):
    /// `base * 2^attempt` with +/-25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.base_backoff.as_millis() as u64 * 2u64.saturating_pow(attempt.min(16));
        let jitter_range = base / 4;
        let jitter = if jitter_range > 0 {
            rand::rng().random_range(0..=jitter_range * 2) as i64 - jitter_range as i64
        } else {
            0
        };
        Duration::from_millis((base as i64 + jitter).max(0) as u64)
    }
}

/// Service client bound to one remote node.
#[derive(Debug, Clone)]
pub struct RpcClient {
    node_id: String,
    base_url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl RpcClient {
    pub fn new(
        node: &NodeMetadata,
        http: reqwest::Client,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node.node_id.clone(),
            base_url: node.address.clone(),
            http,
            retry,
            cancel,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    async fn post<Req, Resp>(&self, path: &str, body: &Req, entity: &str) -> Result<Resp, RpcError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                r = self.post_once(path, body, entity) => r,
                _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
            };
            match result {
                Err(err) if err.is_transient() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    debug!(
                        node_id = %self.node_id,
                        path,
                        attempt = attempt + 1,
                        ?delay,
                        error = %err,
                        "retrying rpc call"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(RpcError::Cancelled),
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn post_once<Req, Resp>(&self, path: &str, body: &Req, entity: &str) -> Result<Resp, RpcError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned + Send,
    {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .json(body)
            .send()
            .await
            .map_err(|e| RpcError::classify_reqwest(&self.node_id, &e))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(RpcError::NotFound {
                name: entity.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RpcError::Status {
                node: self.node_id.clone(),
                status: status.as_u16(),
                body,
            });
        }
        response.json::<Resp>().await.map_err(|e| RpcError::Decode {
            node: self.node_id.clone(),
            message: e.to_string(),
        })
    }

    /// Single `GET /rpc/health`, no retries.
    pub async fn health(&self) -> Result<HealthResponse, RpcError> {
        let response = self
            .http
            .get(format!("{}{HEALTH_PATH}", self.base_url))
            .send()
            .await
            .map_err(|e| RpcError::classify_reqwest(&self.node_id, &e))?;
        if !response.status().is_success() {
            return Err(RpcError::Status {
                node: self.node_id.clone(),
                status: response.status().as_u16(),
                body: String::new(),
            });
        }
        response.json().await.map_err(|e| RpcError::Decode {
            node: self.node_id.clone(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl MonitorService for RpcClient {
    async fn query_iteration_statuses(
        &self,
        fully_qualified_name: &str,
    ) -> Result<Vec<CommandStatus>, RpcError> {
        let response: StatusesResponse = self
            .post(
                MONITOR_STATUSES_PATH,
                &EntityQuery::new(fully_qualified_name),
                fully_qualified_name,
            )
            .await?;
        Ok(response.statuses)
    }
}

#[async_trait]
impl MetricsQueryService for RpcClient {
    async fn get_duration_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DurationMetrics, RpcError> {
        self.post(
            METRICS_DURATION_PATH,
            &EntityQuery::new(fully_qualified_name),
            fully_qualified_name,
        )
        .await
    }

    async fn get_response_code_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ResponseCodeMetrics, RpcError> {
        self.post(
            METRICS_RESPONSE_CODES_PATH,
            &EntityQuery::new(fully_qualified_name),
            fully_qualified_name,
        )
        .await
    }

    async fn get_throughput_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<ThroughputMetrics, RpcError> {
        self.post(
            METRICS_THROUGHPUT_PATH,
            &EntityQuery::new(fully_qualified_name),
            fully_qualified_name,
        )
        .await
    }

    async fn get_data_transmission_metrics(
        &self,
        fully_qualified_name: &str,
    ) -> Result<DataTransmissionMetrics, RpcError> {
        self.post(
            METRICS_DATA_TRANSMISSION_PATH,
            &EntityQuery::new(fully_qualified_name),
            fully_qualified_name,
        )
        .await
    }
}

#[async_trait]
impl IterationTerminationService for RpcClient {
    async fn is_terminated(&self, fully_qualified_name: &str) -> Result<bool, RpcError> {
        let response: TerminationResponse = self
            .post(
                TERMINATION_PATH,
                &EntityQuery::new(fully_qualified_name),
                fully_qualified_name,
            )
            .await?;
        Ok(response.terminated)
    }
}

/// [`NodeConnector`] that talks JSON over HTTP, caching one client per node.
pub struct HttpNodeConnector {
    http: reqwest::Client,
    retry: RetryPolicy,
    cancel: CancellationToken,
    clients: DashMap<String, Arc<RpcClient>>,
}

impl HttpNodeConnector {
    pub fn new(timeout: Duration, retry: RetryPolicy, cancel: CancellationToken) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Connection {
                node: "local".to_string(),
                message: format!("failed to build rpc client: {e}"),
            })?;
        Ok(Self {
            http,
            retry,
            cancel,
            clients: DashMap::new(),
        })
    }

    pub fn client(&self, node: &NodeMetadata) -> Arc<RpcClient> {
        self.clients
            .entry(node.node_id.clone())
            .or_insert_with(|| {
                Arc::new(RpcClient::new(
                    node,
                    self.http.clone(),
                    self.retry,
                    self.cancel.clone(),
                ))
            })
            .clone()
    }
}

#[async_trait]
impl NodeConnector for HttpNodeConnector {
    fn monitor(&self, node: &NodeMetadata) -> Arc<dyn MonitorService> {
        self.client(node)
    }

    fn metrics(&self, node: &NodeMetadata) -> Arc<dyn MetricsQueryService> {
        self.client(node)
    }

    fn termination(&self, node: &NodeMetadata) -> Arc<dyn IterationTerminationService> {
        self.client(node)
    }

    async fn ping(&self, node: &NodeMetadata) -> Result<(), RpcError> {
        self.client(node).health().await.map(|_| ())
    }
}
