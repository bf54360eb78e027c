//! TOML-based node and plan configuration.
//!
//! One file describes the node's role in the cluster, the HTTP client and
//! RPC settings, template variables and the plan to execute. Every node of
//! a cluster is started with the same `[plan]`; only `[node]` and
//! `[cluster]` differ.
//!
//! # Example TOML
//!
//! ```toml
//! [node]
//! role = "master"
//! node_id = "master"
//! listen = "0.0.0.0:7400"
//!
//! [cluster]
//! health_interval_ms = 2000
//! workers = [
//!     { node_id = "worker-1", url = "http://10.0.0.11:7400" },
//! ]
//!
//! [client]
//! request_timeout_ms = 10000
//!
//! [variables]
//! base_url = "http://localhost:8080"
//!
//! [plan]
//! name = "checkout"
//!
//! [[plan.round]]
//! name = "warmup"
//! number_of_clients = 4
//! arrival_delay_ms = 250
//! run_in_parallel = true
//!
//! [[plan.round.iteration]]
//! name = "list-orders"
//! mode = { type = "duration", duration_ms = 30000 }
//! request = { method = "GET", url = "${base_url}/orders" }
//! ```
//!
//! Environment variables `STRESSLAB_ROLE`, `STRESSLAB_NODE_ID`,
//! `STRESSLAB_LISTEN` and `STRESSLAB_MASTER_URL` override the file; CLI
//! flags override both.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::client::ClientConfiguration;
use crate::cluster::{NodeMetadata, NodeRegistry, NodeType, RetryPolicy};
use crate::domain::PlanSetup;
use crate::error::ConfigError;

/// Prefix shared by every environment override.
pub const ENV_PREFIX: &str = "STRESSLAB_";

/// Node id the worker uses for its master when none is configured.
pub const DEFAULT_MASTER_ID: &str = "master";

/// Top-level configuration parsed from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub client: ClientConfiguration,
    #[serde(default)]
    pub rpc: RpcConfig,
    /// Values for `${name}` placeholders in request templates.
    #[serde(default)]
    pub variables: BTreeMap<String, String>,
    pub plan: PlanSetup,
}

/// This node's identity and listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default = "default_role")]
    pub role: NodeType,
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Socket address for the RPC server (and the operator API on a master).
    #[serde(default = "default_listen")]
    pub listen: String,
    /// URL peers use to reach this node. Defaults to `http://{listen}`.
    #[serde(default)]
    pub advertise_url: Option<String>,
    /// How long a worker keeps serving after its plan finishes, so the
    /// master can collect final statuses and metrics.
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
}

fn default_role() -> NodeType {
    NodeType::Master
}

fn default_node_id() -> String {
    "local".to_string()
}

fn default_listen() -> String {
    "127.0.0.1:7400".to_string()
}

fn default_linger_ms() -> u64 {
    30_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            node_id: default_node_id(),
            listen: default_listen(),
            advertise_url: None,
            linger_ms: default_linger_ms(),
        }
    }
}

impl NodeConfig {
    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn advertised_url(&self) -> String {
        self.advertise_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.listen))
    }
}

/// Cluster membership as seen from this node.
///
/// A master lists its workers; a worker names its master.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub master_url: Option<String>,
    #[serde(default = "default_master_id")]
    pub master_id: String,
    #[serde(default)]
    pub workers: Vec<PeerConfig>,
    #[serde(default = "default_health_interval_ms")]
    pub health_interval_ms: u64,
}

fn default_master_id() -> String {
    DEFAULT_MASTER_ID.to_string()
}

fn default_health_interval_ms() -> u64 {
    2_000
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_url: None,
            master_id: default_master_id(),
            workers: Vec::new(),
            health_interval_ms: default_health_interval_ms(),
        }
    }
}

impl ClusterConfig {
    pub fn health_interval(&self) -> Duration {
        Duration::from_millis(self.health_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerConfig {
    pub node_id: String,
    pub url: String,
}

/// Master/worker RPC client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_rpc_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_backoff_ms() -> u64 {
    200
}

fn default_rpc_timeout_ms() -> u64 {
    5_000
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_backoff_ms: default_base_backoff_ms(),
            timeout_ms: default_rpc_timeout_ms(),
        }
    }
}

impl RpcConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl StressConfig {
    /// Parse a TOML string, apply environment overrides, and validate.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(content)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load a [`StressConfig`] from a file path.
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Parse`] if the TOML is malformed, or
    /// [`ConfigError::Validation`] if validation fails.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            source,
            path: path.display().to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Applies `STRESSLAB_*` overrides read through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(role) = var("ROLE") {
            self.node.role = role
                .parse()
                .map_err(|e: String| ConfigError::validation(format!("{ENV_PREFIX}ROLE: {e}")))?;
        }
        if let Some(node_id) = var("NODE_ID") {
            self.node.node_id = node_id;
        }
        if let Some(listen) = var("LISTEN") {
            self.node.listen = listen;
        }
        if let Some(master_url) = var("MASTER_URL") {
            self.cluster.master_url = Some(master_url);
        }
        Ok(())
    }

    /// Validate that the config is semantically correct.
    ///
    /// Checks:
    /// - The node id is not empty and `listen` is a socket address
    /// - A worker names its master; a master lists no master
    /// - Worker ids are unique and every peer URL parses
    /// - The plan has a name and at least one round
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.node.node_id.trim().is_empty() {
            return Err(ConfigError::validation("node.node_id must not be empty"));
        }
        self.node.listen.parse::<SocketAddr>().map_err(|e| {
            ConfigError::validation(format!("node.listen '{}' is not a socket address: {e}", self.node.listen))
        })?;
        if self.cluster.health_interval_ms == 0 {
            return Err(ConfigError::validation(
                "cluster.health_interval_ms must be greater than 0",
            ));
        }

        match self.node.role {
            NodeType::Worker => {
                let url = self.cluster.master_url.as_deref().ok_or_else(|| {
                    ConfigError::validation("a worker needs cluster.master_url")
                })?;
                check_url("cluster.master_url", url)?;
            }
            NodeType::Master => {
                if self.cluster.master_url.is_some() {
                    return Err(ConfigError::validation(
                        "cluster.master_url is only valid for workers",
                    ));
                }
            }
        }

        let mut seen = HashSet::new();
        for worker in &self.cluster.workers {
            if !seen.insert(worker.node_id.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate worker node_id '{}'",
                    worker.node_id
                )));
            }
            if worker.node_id == self.node.node_id {
                return Err(ConfigError::validation(format!(
                    "worker '{}' reuses this node's id",
                    worker.node_id
                )));
            }
            check_url(&format!("worker '{}'", worker.node_id), &worker.url)?;
        }

        if self.plan.name.trim().is_empty() {
            return Err(ConfigError::validation("plan.name must not be empty"));
        }
        if self.plan.rounds.is_empty() {
            return Err(ConfigError::validation(
                "plan must contain at least one [[plan.round]]",
            ));
        }
        Ok(())
    }

    /// Membership table seeded from `[node]` and `[cluster]`.
    pub fn node_registry(&self) -> NodeRegistry {
        let registry = NodeRegistry::new(NodeMetadata::new(
            self.node.node_id.clone(),
            self.node.role,
            self.node.advertised_url(),
        ));
        match self.node.role {
            NodeType::Master => {
                for worker in &self.cluster.workers {
                    registry.register(NodeMetadata::new(
                        worker.node_id.clone(),
                        NodeType::Worker,
                        worker.url.clone(),
                    ));
                }
            }
            NodeType::Worker => {
                if let Some(url) = &self.cluster.master_url {
                    registry.register(NodeMetadata::new(
                        self.cluster.master_id.clone(),
                        NodeType::Master,
                        url.clone(),
                    ));
                }
            }
        }
        registry
    }
}

fn check_url(what: &str, value: &str) -> Result<(), ConfigError> {
    url::Url::parse(value)
        .map(|_| ())
        .map_err(|e| ConfigError::validation(format!("{what}: invalid URL '{value}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const PLAN: &str = r#"
[plan]
name = "checkout"

[[plan.round]]
name = "warmup"
number_of_clients = 2

[[plan.round.iteration]]
name = "list"
mode = { type = "request_count", count = 5 }
request = { url = "${base_url}/orders" }
"#;

    fn parse(extra: &str) -> Result<StressConfig, ConfigError> {
        let content = format!("{extra}\n{PLAN}");
        let config: StressConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn test_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.node.role, NodeType::Master);
        assert_eq!(config.node.node_id, "local");
        assert_eq!(config.node.listen, "127.0.0.1:7400");
        assert_eq!(config.node.advertised_url(), "http://127.0.0.1:7400");
        assert_eq!(config.node.linger(), Duration::from_secs(30));
        assert_eq!(config.cluster.health_interval(), Duration::from_secs(2));
        assert_eq!(config.client, ClientConfiguration::default());
        assert_eq!(config.rpc.retry_policy(), RetryPolicy::default());
        assert_eq!(config.plan.rounds[0].iterations.len(), 1);
    }

    #[test]
    fn test_full_master_config() {
        let config = parse(
            r#"
[node]
node_id = "m1"
listen = "0.0.0.0:9000"

[cluster]
workers = [
    { node_id = "w1", url = "http://10.0.0.1:9000" },
    { node_id = "w2", url = "http://10.0.0.2:9000" },
]

[rpc]
max_retries = 1
base_backoff_ms = 50

[variables]
base_url = "http://localhost:8080"
"#,
        )
        .unwrap();
        assert_eq!(config.cluster.workers.len(), 2);
        assert_eq!(config.rpc.retry_policy().max_retries, 1);
        assert_eq!(config.variables["base_url"], "http://localhost:8080");

        let registry = config.node_registry();
        assert!(registry.is_master());
        assert_eq!(registry.active_nodes(NodeType::Worker).len(), 2);
        assert!(registry.master().is_none());
    }

    #[test]
    fn test_worker_needs_master_url() {
        let err = parse("[node]\nrole = \"worker\"\nnode_id = \"w1\"").unwrap_err();
        assert!(err.to_string().contains("master_url"));
    }

    #[test]
    fn test_worker_registry_points_at_master() {
        let config = parse(
            "[node]\nrole = \"worker\"\nnode_id = \"w1\"\n[cluster]\nmaster_url = \"http://10.0.0.9:7400/\"",
        )
        .unwrap();
        let registry = config.node_registry();
        assert!(!registry.is_master());
        let master = registry.master().unwrap();
        assert_eq!(master.node_id, DEFAULT_MASTER_ID);
        assert_eq!(master.address, "http://10.0.0.9:7400");
    }

    #[test]
    fn test_master_rejects_master_url() {
        let err = parse("[cluster]\nmaster_url = \"http://x:1\"").unwrap_err();
        assert!(err.to_string().contains("only valid for workers"));
    }

    #[test]
    fn test_duplicate_worker_ids_rejected() {
        let err = parse(
            r#"
[cluster]
workers = [
    { node_id = "w1", url = "http://a:1" },
    { node_id = "w1", url = "http://b:1" },
]
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate worker"));
    }

    #[test]
    fn test_bad_listen_rejected() {
        let err = parse("[node]\nlisten = \"localhost\"").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { .. }));
    }

    #[test]
    fn test_plan_without_rounds_rejected() {
        let config: StressConfig = toml::from_str("[plan]\nname = \"empty\"").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("STRESSLAB_ROLE".to_string(), "worker".to_string()),
            ("STRESSLAB_NODE_ID".to_string(), "w7".to_string()),
            ("STRESSLAB_LISTEN".to_string(), "0.0.0.0:7500".to_string()),
            ("STRESSLAB_MASTER_URL".to_string(), "http://m:7400".to_string()),
        ]);
        let mut config = parse("").unwrap();
        config.apply_env_overrides(|k| env.get(k).cloned()).unwrap();
        config.validate().unwrap();

        assert_eq!(config.node.role, NodeType::Worker);
        assert_eq!(config.node.node_id, "w7");
        assert_eq!(config.node.listen, "0.0.0.0:7500");
        assert_eq!(config.cluster.master_url.as_deref(), Some("http://m:7400"));
    }

    #[test]
    fn test_env_override_bad_role() {
        let mut config = parse("").unwrap();
        let err = config
            .apply_env_overrides(|k| (k == "STRESSLAB_ROLE").then(|| "boss".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("boss"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{PLAN}").unwrap();
        let config = StressConfig::load(file.path()).unwrap();
        assert_eq!(config.plan.name, "checkout");
    }

    #[test]
    fn test_load_missing_file() {
        let err = StressConfig::load(Path::new("/nonexistent/stresslab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
