//! Entity discovery: iteration id <-> fully-qualified name.
//!
//! Every node builds its iterations from the same plan but assigns fresh
//! ids, so nodes talk about iterations by their fully-qualified name
//! `plan.round.iteration` and translate locally.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{HttpIteration, Plan};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub iteration_id: Uuid,
    pub fully_qualified_name: String,
}

/// Joins plan, round and iteration names. Names never contain it.
pub const FQN_SEPARATOR: char = '.';

pub fn fully_qualified_name(plan: &str, round: &str, iteration: &str) -> String {
    format!("{plan}{FQN_SEPARATOR}{round}{FQN_SEPARATOR}{iteration}")
}

#[derive(Debug, Default)]
pub struct EntityDiscovery {
    records: DashMap<Uuid, DiscoveryRecord>,
    by_name: DashMap<String, Uuid>,
    iterations: DashMap<Uuid, Arc<HttpIteration>>,
}

impl EntityDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Indexes every iteration of `plan`.
    pub fn from_plan(plan: &Plan) -> Self {
        let discovery = Self::new();
        for round in plan.rounds() {
            for iteration in round.iterations() {
                discovery.register(plan.name(), round.name(), iteration);
            }
        }
        discovery
    }

    pub fn register(&self, plan: &str, round: &str, iteration: &Arc<HttpIteration>) -> DiscoveryRecord {
        let record = DiscoveryRecord {
            iteration_id: iteration.id(),
            fully_qualified_name: fully_qualified_name(plan, round, iteration.name()),
        };
        self.by_name
            .insert(record.fully_qualified_name.clone(), record.iteration_id);
        self.iterations.insert(iteration.id(), iteration.clone());
        self.records.insert(record.iteration_id, record.clone());
        record
    }

    /// First record matching `predicate`.
    pub fn find(&self, predicate: impl Fn(&DiscoveryRecord) -> bool) -> Option<DiscoveryRecord> {
        self.records
            .iter()
            .find(|r| predicate(r.value()))
            .map(|r| r.clone())
    }

    pub fn find_by_id(&self, iteration_id: Uuid) -> Option<DiscoveryRecord> {
        self.records.get(&iteration_id).map(|r| r.clone())
    }

    pub fn find_by_name(&self, fully_qualified_name: &str) -> Option<DiscoveryRecord> {
        let id = *self.by_name.get(fully_qualified_name)?;
        self.find_by_id(id)
    }

    pub fn iteration(&self, iteration_id: Uuid) -> Option<Arc<HttpIteration>> {
        self.iterations.get(&iteration_id).map(|i| i.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PlanSetup;

    fn plan() -> Plan {
        let setup: PlanSetup = toml::from_str(
            r#"
            name = "shop"
            [[round]]
            name = "warmup"
            number_of_clients = 1
            [[round.iteration]]
            name = "browse"
            mode = { type = "request_count", count = 1 }
            request = { url = "http://localhost/" }
            [[round.iteration]]
            name = "buy"
            mode = { type = "request_count", count = 1 }
            request = { url = "http://localhost/buy" }
            "#,
        )
        .unwrap();
        Plan::from_setup(setup).unwrap()
    }

    #[test]
    fn test_from_plan_indexes_every_iteration() {
        let plan = plan();
        let discovery = EntityDiscovery::from_plan(&plan);
        assert_eq!(discovery.len(), 2);

        let record = discovery.find_by_name("shop.warmup.buy").unwrap();
        let iteration = discovery.iteration(record.iteration_id).unwrap();
        assert_eq!(iteration.name(), "buy");
        assert_eq!(
            discovery.find_by_id(record.iteration_id).unwrap(),
            record
        );
    }

    #[test]
    fn test_find_with_predicate() {
        let discovery = EntityDiscovery::from_plan(&plan());
        let record = discovery
            .find(|r| r.fully_qualified_name.ends_with(".browse"))
            .unwrap();
        assert_eq!(record.fully_qualified_name, "shop.warmup.browse");
        assert!(discovery.find(|_| false).is_none());
        assert!(discovery.find_by_name("shop.warmup.nope").is_none());
    }
}
