//! `stresslab run` command implementation.

use anyhow::{Context, Result};
use std::io::IsTerminal;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use stresslab::cluster::NodeType;
use stresslab::config::StressConfig;
use stresslab::report::{render_summary, write_report};
use stresslab::runtime;

/// Execute the `run` command.
///
/// Loads the config, applies CLI overrides, runs this node until the plan
/// finishes or Ctrl+C, then prints the summary and writes the report.
pub async fn execute_run(
    config_path: PathBuf,
    role: Option<NodeType>,
    listen: Option<String>,
    no_report: bool,
    no_color: bool,
) -> Result<()> {
    if !config_path.exists() {
        anyhow::bail!("Config file not found: {}", config_path.display());
    }
    let mut config = StressConfig::load(&config_path)
        .with_context(|| format!("Failed to load config '{}'", config_path.display()))?;
    apply_overrides(&mut config, role, listen);
    config.validate().context("Invalid config after CLI overrides")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling run");
                cancel.cancel();
            }
        });
    }

    let is_master = config.node.role == NodeType::Master;
    let report = runtime::run(config, cancel)
        .await
        .context("Load test failed")?;

    if no_color || !std::io::stdout().is_terminal() {
        colored::control::set_override(false);
    }
    println!("{}", render_summary(&report));

    if is_master && !no_report {
        let cwd = std::env::current_dir()?;
        match write_report(&report, &cwd) {
            Ok(path) => {
                eprintln!();
                eprintln!("Report written to: {}", path.display());
            },
            Err(e) => {
                eprintln!();
                eprintln!("Warning: Failed to write report: {e}");
            },
        }
    }

    if !report.all_succeeded() {
        anyhow::bail!("Not every iteration succeeded: {:?}", report.status_counts());
    }
    Ok(())
}

/// CLI flags win over the file and the environment.
fn apply_overrides(config: &mut StressConfig, role: Option<NodeType>, listen: Option<String>) {
    if let Some(role) = role {
        config.node.role = role;
    }
    if let Some(listen) = listen {
        config.node.listen = listen;
    }
}
