//! Node metadata and the cluster membership table.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::NodeConnector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Master,
    Worker,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Master => f.write_str("master"),
            Self::Worker => f.write_str("worker"),
        }
    }
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "master" => Ok(Self::Master),
            "worker" => Ok(Self::Worker),
            other => Err(format!("unknown node role '{other}'")),
        }
    }
}

/// One cluster member as seen from this node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeMetadata {
    pub node_id: String,
    pub node_type: NodeType,
    /// Base URL of the node's RPC server, e.g. `http://10.0.0.7:7400`.
    pub address: String,
    pub active: bool,
    pub last_seen: Option<DateTime<Utc>>,
}

impl NodeMetadata {
    pub fn new(node_id: impl Into<String>, node_type: NodeType, address: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            node_type,
            address: address.into().trim_end_matches('/').to_string(),
            active: true,
            last_seen: None,
        }
    }
}

/// Membership table: the local node plus every known peer.
///
/// Peers start active; the health probe flips them as they stop or
/// resume answering. Scatter-gather callers only contact active peers.
#[derive(Debug)]
pub struct NodeRegistry {
    local: NodeMetadata,
    peers: DashMap<String, NodeMetadata>,
}

impl NodeRegistry {
    pub fn new(local: NodeMetadata) -> Self {
        Self {
            local,
            peers: DashMap::new(),
        }
    }

    /// A master with no peers.
    pub fn standalone(node_id: impl Into<String>) -> Self {
        Self::new(NodeMetadata::new(node_id, NodeType::Master, ""))
    }

    pub fn local_node(&self) -> &NodeMetadata {
        &self.local
    }

    pub fn is_master(&self) -> bool {
        self.local.node_type == NodeType::Master
    }

    pub fn register(&self, node: NodeMetadata) {
        debug!(node_id = %node.node_id, node_type = %node.node_type, "registered peer");
        self.peers.insert(node.node_id.clone(), node);
    }

    pub fn get(&self, node_id: &str) -> Option<NodeMetadata> {
        self.peers.get(node_id).map(|n| n.clone())
    }

    pub fn mark_active(&self, node_id: &str) {
        if let Some(mut node) = self.peers.get_mut(node_id) {
            if !node.active {
                info!(node_id, "peer is reachable again");
            }
            node.active = true;
            node.last_seen = Some(Utc::now());
        }
    }

    pub fn mark_inactive(&self, node_id: &str) {
        if let Some(mut node) = self.peers.get_mut(node_id) {
            if node.active {
                warn!(node_id, "peer became unreachable");
            }
            node.active = false;
        }
    }

    /// Active peers of the given type, ordered by node id.
    pub fn active_nodes(&self, node_type: NodeType) -> Vec<NodeMetadata> {
        let mut nodes: Vec<NodeMetadata> = self
            .peers
            .iter()
            .filter(|n| n.node_type == node_type && n.active)
            .map(|n| n.clone())
            .collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// Every peer, ordered by node id.
    pub fn peers(&self) -> Vec<NodeMetadata> {
        let mut nodes: Vec<NodeMetadata> = self.peers.iter().map(|n| n.clone()).collect();
        nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        nodes
    }

    /// The master this worker reports to, if any.
    pub fn master(&self) -> Option<NodeMetadata> {
        self.peers
            .iter()
            .find(|n| n.node_type == NodeType::Master)
            .map(|n| n.clone())
    }
}

/// Pings every peer each `interval` and updates its active flag until
/// `cancel` fires.
pub async fn run_health_probe(
    registry: Arc<NodeRegistry>,
    connector: Arc<dyn NodeConnector>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => return,
        }
        let peers = registry.peers();
        let probes = peers.iter().map(|node| connector.ping(node));
        let results = futures::future::join_all(probes).await;
        for (node, result) in peers.iter().zip(results) {
            match result {
                Ok(()) => registry.mark_active(&node.node_id),
                Err(e) => {
                    debug!(node_id = %node.node_id, error = %e, "health probe failed");
                    registry.mark_inactive(&node.node_id);
                }
            }
        }
    }
}
