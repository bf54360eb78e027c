//! `stresslab validate` command implementation.

use anyhow::{Context, Result};
use std::path::Path;

use stresslab::config::StressConfig;
use stresslab::domain::Plan;

/// Loads the config, builds the plan, and lists what would be skipped.
pub fn execute(path: &Path) -> Result<()> {
    let config = StressConfig::load(path)
        .with_context(|| format!("Failed to load config '{}'", path.display()))?;
    let plan = Plan::from_setup(config.plan.clone())?;

    println!(
        "{}: plan '{}' for {} node '{}'",
        path.display(),
        plan.name(),
        config.node.role,
        config.node.node_id
    );
    for round in plan.rounds() {
        let state = if round.is_valid() { "ok" } else { "skipped" };
        println!("  round '{}' ({state})", round.name());
        for error in round.validation_errors() {
            println!("    - {error}");
        }
        for it in round.iterations() {
            let state = if it.is_valid() { "ok" } else { "skipped" };
            println!("    iteration '{}' ({state})", it.name());
            for error in it.validation_errors() {
                println!("      - {error}");
            }
        }
    }
    Ok(())
}
