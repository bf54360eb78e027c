//! Master/worker coordination.
//!
//! Every node runs the same plan. The master additionally answers
//! cluster-wide questions (command statuses, metrics, termination) by
//! combining its own state with what active workers report over RPC.
//! Workers only ever serve their local state.

pub mod aggregate;
pub mod client;
pub mod discovery;
pub mod local;
pub mod node;
pub mod rpc;
pub mod server;

pub use aggregate::{collect_snapshot, ClusterMetricsQuery};
pub use client::{HttpNodeConnector, RetryPolicy, RpcClient};
pub use discovery::{fully_qualified_name, DiscoveryRecord, EntityDiscovery, FQN_SEPARATOR};
pub use local::{LocalMetricsQueryService, LocalMonitorService, LocalTerminationService};
pub use node::{run_health_probe, NodeMetadata, NodeRegistry, NodeType};
pub use rpc::{IterationTerminationService, MetricsQueryService, MonitorService, NodeConnector};
pub use server::RpcState;

use futures::future::join_all;
use std::future::Future;
use tracing::warn;

use crate::error::RpcError;

/// Calls `call` on every node concurrently and keeps the successful
/// answers. A failing node is logged and skipped.
pub async fn scatter<T, F, Fut>(nodes: &[NodeMetadata], call: F) -> Vec<T>
where
    F: Fn(NodeMetadata) -> Fut,
    Fut: Future<Output = Result<T, RpcError>>,
{
    let calls = nodes.iter().cloned().map(|node| {
        let node_id = node.node_id.clone();
        let fut = call(node);
        async move { (node_id, fut.await) }
    });

    join_all(calls)
        .await
        .into_iter()
        .filter_map(|(node_id, result)| match result {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(node_id = %node_id, error = %err, "remote query failed, skipping node");
                None
            }
        })
        .collect()
}
