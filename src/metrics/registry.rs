//! Process-wide table of per-iteration metrics.
//!
//! [`MetricsRegistry`] is constructed once at startup and passed by
//! reference to everything that records or reads metrics. Entries are
//! created on the first [`monitor`](MetricsRegistry::monitor) call and stay
//! readable after the last [`stop`](MetricsRegistry::stop) so post-run
//! evaluation still sees them.

use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::{IterationMetrics, IterationSnapshot};
use crate::domain::HttpIteration;

#[derive(Debug, Default)]
pub struct MetricsRegistry {
    entries: DashMap<Uuid, Arc<IterationMetrics>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts monitoring one execution of `iteration` and returns its collectors.
    pub fn monitor(&self, iteration: &HttpIteration) -> Arc<IterationMetrics> {
        let metrics = self
            .entries
            .entry(iteration.id())
            .or_insert_with(|| Arc::new(IterationMetrics::new(iteration.id())))
            .clone();
        metrics.begin_execution();
        metrics
    }

    /// Stops monitoring one execution. Returns `true` when no execution of
    /// the iteration is monitored anymore.
    pub fn stop(&self, iteration_id: Uuid) -> bool {
        match self.entries.get(&iteration_id) {
            Some(metrics) => metrics.end_execution(),
            None => false,
        }
    }

    pub fn is_monitored(&self, iteration_id: Uuid) -> bool {
        self.entries
            .get(&iteration_id)
            .is_some_and(|m| m.active_executions() > 0)
    }

    pub fn get(&self, iteration_id: Uuid) -> Option<Arc<IterationMetrics>> {
        self.entries.get(&iteration_id).map(|m| m.clone())
    }

    /// Returns the collectors for `iteration_id`, creating empty ones if
    /// nothing was recorded yet.
    pub fn get_or_create(&self, iteration_id: Uuid) -> Arc<IterationMetrics> {
        self.entries
            .entry(iteration_id)
            .or_insert_with(|| Arc::new(IterationMetrics::new(iteration_id)))
            .clone()
    }

    pub fn snapshot(&self, iteration_id: Uuid) -> Option<IterationSnapshot> {
        self.get(iteration_id).map(|m| m.snapshot())
    }

    /// Snapshots of every known iteration, ordered by iteration id.
    pub fn snapshots(&self) -> Vec<IterationSnapshot> {
        let mut all: Vec<IterationSnapshot> =
            self.entries.iter().map(|e| e.value().snapshot()).collect();
        all.sort_by_key(|s| s.iteration_id);
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
