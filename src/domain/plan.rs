//! Plans and rounds.
//!
//! A [`Plan`] owns an ordered list of [`Round`]s; a round owns an ordered
//! list of [`HttpIteration`]s plus the client policy that drives them.
//! Both are built once from their setup commands and never mutated.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::cluster::FQN_SEPARATOR;
use crate::domain::{HttpIteration, IterationSetup};
use crate::error::ConfigError;

/// Setup command for a [`Round`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundSetup {
    pub name: String,
    pub number_of_clients: u32,
    /// Stagger between client activations.
    #[serde(default)]
    pub arrival_delay_ms: u64,
    #[serde(default)]
    pub startup_delay_ms: u64,
    /// Create clients lazily at first use instead of warming the pool.
    #[serde(default)]
    pub delay_client_creation_until_needed: bool,
    #[serde(default)]
    pub run_in_parallel: bool,
    #[serde(default, rename = "iteration")]
    pub iterations: Vec<IterationSetup>,
}

/// Setup command for a [`Plan`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanSetup {
    pub name: String,
    #[serde(default, rename = "round")]
    pub rounds: Vec<RoundSetup>,
}

#[derive(Debug, Clone)]
pub struct Round {
    id: Uuid,
    name: String,
    number_of_clients: u32,
    arrival_delay: Duration,
    startup_delay: Duration,
    delay_client_creation_until_needed: bool,
    run_in_parallel: bool,
    iterations: Vec<Arc<HttpIteration>>,
    validation_errors: Vec<String>,
}

impl Round {
    pub fn from_setup(setup: RoundSetup) -> Self {
        let mut errors = Vec::new();
        if setup.name.trim().is_empty() {
            errors.push("round name must not be empty".to_string());
        }
        if setup.number_of_clients == 0 {
            errors.push("number_of_clients must be greater than 0".to_string());
        }

        let iterations = setup
            .iterations
            .into_iter()
            .map(|s| Arc::new(HttpIteration::from_setup(s)))
            .collect();

        Self {
            id: Uuid::new_v4(),
            name: setup.name,
            number_of_clients: setup.number_of_clients,
            arrival_delay: Duration::from_millis(setup.arrival_delay_ms),
            startup_delay: Duration::from_millis(setup.startup_delay_ms),
            delay_client_creation_until_needed: setup.delay_client_creation_until_needed,
            run_in_parallel: setup.run_in_parallel,
            iterations,
            validation_errors: errors,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn number_of_clients(&self) -> u32 {
        self.number_of_clients
    }

    pub fn arrival_delay(&self) -> Duration {
        self.arrival_delay
    }

    pub fn startup_delay(&self) -> Duration {
        self.startup_delay
    }

    pub fn delay_client_creation_until_needed(&self) -> bool {
        self.delay_client_creation_until_needed
    }

    pub fn run_in_parallel(&self) -> bool {
        self.run_in_parallel
    }

    pub fn iterations(&self) -> &[Arc<HttpIteration>] {
        &self.iterations
    }

    pub fn is_valid(&self) -> bool {
        self.validation_errors.is_empty()
    }

    pub fn validation_errors(&self) -> &[String] {
        &self.validation_errors
    }
}

#[derive(Debug, Clone)]
pub struct Plan {
    id: Uuid,
    name: String,
    rounds: Vec<Round>,
}

impl Plan {
    /// Builds a plan from its setup command.
    ///
    /// Plan-level problems are rejected: no name, no rounds, and names
    /// that would collide in fully qualified names (duplicates, or any
    /// name containing the `.` separator). Invalid rounds and iterations are kept but flagged, and
    /// executors skip them.
    pub fn from_setup(setup: PlanSetup) -> Result<Self, ConfigError> {
        if setup.name.trim().is_empty() {
            return Err(ConfigError::validation("plan name must not be empty"));
        }
        check_name_segment("plan", &setup.name)?;
        if setup.rounds.is_empty() {
            return Err(ConfigError::validation(format!(
                "plan '{}' must contain at least one [[plan.round]]",
                setup.name
            )));
        }

        let mut round_names = std::collections::HashSet::new();
        for round in &setup.rounds {
            check_name_segment("round", &round.name)?;
            if !round_names.insert(round.name.as_str()) {
                return Err(ConfigError::validation(format!(
                    "duplicate round name '{}'",
                    round.name
                )));
            }
            let mut iteration_names = std::collections::HashSet::new();
            for iteration in &round.iterations {
                check_name_segment("iteration", &iteration.name)?;
                if !iteration_names.insert(iteration.name.as_str()) {
                    return Err(ConfigError::validation(format!(
                        "duplicate iteration name '{}' in round '{}'",
                        iteration.name, round.name
                    )));
                }
            }
        }

        let rounds: Vec<Round> = setup.rounds.into_iter().map(Round::from_setup).collect();
        for round in &rounds {
            if !round.is_valid() {
                warn!(round = %round.name(), errors = ?round.validation_errors(), "round is invalid and will be skipped");
            }
            for iteration in round.iterations() {
                if !iteration.is_valid() {
                    warn!(
                        round = %round.name(),
                        iteration = %iteration.name(),
                        errors = ?iteration.validation_errors(),
                        "iteration is invalid and will be skipped"
                    );
                }
            }
        }

        Ok(Self {
            id: Uuid::new_v4(),
            name: setup.name,
            rounds,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    pub fn round(&self, id: Uuid) -> Option<&Round> {
        self.rounds.iter().find(|r| r.id() == id)
    }

    /// Looks up an iteration by id across all rounds.
    pub fn iteration(&self, id: Uuid) -> Option<&Arc<HttpIteration>> {
        self.iterations().find(|i| i.id() == id)
    }

    pub fn iterations(&self) -> impl Iterator<Item = &Arc<HttpIteration>> {
        self.rounds.iter().flat_map(|r| r.iterations().iter())
    }
}

fn check_name_segment(kind: &str, name: &str) -> Result<(), ConfigError> {
    if name.contains(FQN_SEPARATOR) {
        return Err(ConfigError::validation(format!(
            "{kind} name '{name}' must not contain '{FQN_SEPARATOR}'"
        )));
    }
    Ok(())
}
