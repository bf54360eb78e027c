//! Registry of execution commands, queried per iteration.
//!
//! Commands are registered before they are dispatched, so a query issued
//! at any point after a round has started sees every command of that round,
//! including ones still waiting for their arrival time. On the master a
//! query also gathers the statuses held by every active worker.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::StatusQuery;
use crate::cluster::{scatter, EntityDiscovery, NodeConnector, NodeRegistry, NodeType};
use crate::domain::{CommandStatus, ExecutionCommand, HttpIteration};

struct MonitoredIteration {
    iteration: Arc<HttpIteration>,
    commands: Vec<Arc<ExecutionCommand>>,
}

pub struct CommandStatusMonitor {
    entries: DashMap<Uuid, MonitoredIteration>,
    discovery: Arc<EntityDiscovery>,
    nodes: Arc<NodeRegistry>,
    connector: Arc<dyn NodeConnector>,
}

impl CommandStatusMonitor {
    pub fn new(
        discovery: Arc<EntityDiscovery>,
        nodes: Arc<NodeRegistry>,
        connector: Arc<dyn NodeConnector>,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            discovery,
            nodes,
            connector,
        }
    }

    pub fn register(&self, command: Arc<ExecutionCommand>, iteration: &Arc<HttpIteration>) {
        self.entries
            .entry(iteration.id())
            .or_insert_with(|| MonitoredIteration {
                iteration: iteration.clone(),
                commands: Vec::new(),
            })
            .commands
            .push(command);
    }

    /// Drops a command. Returns `false` if it was not registered.
    pub fn unregister(&self, command_id: Uuid) -> bool {
        let mut emptied = None;
        let mut removed = false;
        for mut entry in self.entries.iter_mut() {
            let before = entry.commands.len();
            entry.commands.retain(|c| c.id() != command_id);
            if entry.commands.len() < before {
                removed = true;
                if entry.commands.is_empty() {
                    emptied = Some(*entry.key());
                }
                break;
            }
        }
        if let Some(iteration_id) = emptied {
            self.entries
                .remove_if(&iteration_id, |_, e| e.commands.is_empty());
        }
        removed
    }

    /// Statuses of the commands held by this node only.
    pub fn local_statuses(&self, iteration_id: Uuid) -> Vec<CommandStatus> {
        self.entries
            .get(&iteration_id)
            .map(|e| e.commands.iter().map(|c| c.status()).collect())
            .unwrap_or_default()
    }

    pub fn commands(&self, iteration_id: Uuid) -> Vec<Arc<ExecutionCommand>> {
        self.entries
            .get(&iteration_id)
            .map(|e| e.commands.clone())
            .unwrap_or_default()
    }

    /// Statuses of every command of `iteration`, cluster-wide on the master.
    pub async fn query(&self, iteration: &HttpIteration) -> Vec<CommandStatus> {
        let mut statuses = self.local_statuses(iteration.id());
        statuses.extend(self.remote_statuses(iteration).await);
        statuses
    }

    /// Statuses for every registered iteration matching `predicate`.
    pub async fn query_where(
        &self,
        predicate: impl Fn(&HttpIteration) -> bool + Send,
    ) -> HashMap<Uuid, Vec<CommandStatus>> {
        let selected: Vec<Arc<HttpIteration>> = self
            .entries
            .iter()
            .filter(|e| predicate(&e.iteration))
            .map(|e| e.iteration.clone())
            .collect();

        join_all(
            selected
                .iter()
                .map(|it| async move { (it.id(), self.query(it).await) }),
        )
        .await
        .into_iter()
        .collect()
    }

    pub async fn is_any_ongoing(&self, iteration: &HttpIteration) -> bool {
        self.query(iteration).await.iter().any(CommandStatus::is_active)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    async fn remote_statuses(&self, iteration: &HttpIteration) -> Vec<CommandStatus> {
        if !self.nodes.is_master() {
            return Vec::new();
        }
        let workers = self.nodes.active_nodes(NodeType::Worker);
        if workers.is_empty() {
            return Vec::new();
        }
        let Some(record) = self.discovery.find_by_id(iteration.id()) else {
            warn!(iteration = %iteration.name(), "iteration not discoverable, skipping workers");
            return Vec::new();
        };
        let fqn = record.fully_qualified_name.as_str();

        scatter(&workers, |node| {
            let service = self.connector.monitor(&node);
            async move { service.query_iteration_statuses(fqn).await }
        })
        .await
        .into_iter()
        .flatten()
        .collect()
    }
}

#[async_trait]
impl StatusQuery for CommandStatusMonitor {
    async fn query(&self, iteration: &HttpIteration) -> Vec<CommandStatus> {
        CommandStatusMonitor::query(self, iteration).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{HttpNodeConnector, RetryPolicy};
    use crate::domain::{HttpRequestSpec, IterationMode, IterationSetup};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn iteration(name: &str) -> Arc<HttpIteration> {
        Arc::new(HttpIteration::from_setup(IterationSetup {
            name: name.to_string(),
            startup_delay_ms: 0,
            mode: IterationMode::RequestCount { count: 1 },
            maximize_throughput: false,
            request: HttpRequestSpec {
                method: "GET".to_string(),
                url: "http://localhost/".to_string(),
                headers: Default::default(),
                body: None,
            },
            failure_criteria: Default::default(),
            termination_rules: vec![],
        }))
    }

    fn monitor() -> CommandStatusMonitor {
        let connector = HttpNodeConnector::new(
            Duration::from_secs(1),
            RetryPolicy::none(),
            CancellationToken::new(),
        )
        .unwrap();
        CommandStatusMonitor::new(
            Arc::new(EntityDiscovery::new()),
            Arc::new(NodeRegistry::standalone("solo")),
            Arc::new(connector),
        )
    }

    #[tokio::test]
    async fn test_registered_commands_visible_before_start() {
        let monitor = monitor();
        let it = iteration("a");
        monitor.register(Arc::new(ExecutionCommand::scheduled(it.id())), &it);
        monitor.register(Arc::new(ExecutionCommand::scheduled(it.id())), &it);

        assert_eq!(
            monitor.query(&it).await,
            vec![CommandStatus::Scheduled, CommandStatus::Scheduled]
        );
        assert!(monitor.is_any_ongoing(&it).await);
    }

    #[tokio::test]
    async fn test_terminal_commands_not_ongoing() {
        let monitor = monitor();
        let it = iteration("a");
        let command = Arc::new(ExecutionCommand::scheduled(it.id()));
        monitor.register(command.clone(), &it);
        command.transition(CommandStatus::Ongoing).unwrap();
        command.transition(CommandStatus::Completed).unwrap();

        assert!(!monitor.is_any_ongoing(&it).await);
    }

    #[tokio::test]
    async fn test_unknown_iteration_has_no_statuses() {
        let monitor = monitor();
        assert!(monitor.query(&iteration("ghost")).await.is_empty());
    }

    #[tokio::test]
    async fn test_unregister_removes_command() {
        let monitor = monitor();
        let it = iteration("a");
        let command = Arc::new(ExecutionCommand::scheduled(it.id()));
        monitor.register(command.clone(), &it);

        assert!(monitor.unregister(command.id()));
        assert!(!monitor.unregister(command.id()));
        assert!(monitor.local_statuses(it.id()).is_empty());
    }

    #[tokio::test]
    async fn test_query_where_filters_iterations() {
        let monitor = monitor();
        let a = iteration("a");
        let b = iteration("b");
        monitor.register(Arc::new(ExecutionCommand::scheduled(a.id())), &a);
        monitor.register(Arc::new(ExecutionCommand::scheduled(b.id())), &b);

        let result = monitor.query_where(|it| it.name() == "b").await;
        assert_eq!(result.len(), 1);
        assert_eq!(result[&b.id()], vec![CommandStatus::Scheduled]);
    }
}
