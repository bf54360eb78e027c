//! stresslab: distributed HTTP load testing.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use stresslab::cluster::NodeType;
use stresslab::logging::{self, LogFormat};

mod commands;

/// Distributed HTTP load testing engine
#[derive(Parser)]
#[command(name = "stresslab")]
#[command(about = "Run plan/round/iteration load tests across a master/worker cluster", long_about = None)]
#[command(version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured plan on this node
    ///
    /// A master serves the RPC and operator API, runs the plan, gathers
    /// cluster-wide statuses and writes a JSON report. A worker serves RPC,
    /// runs the plan and lingers so the master can collect final results.
    Run {
        /// Path to the TOML config file
        #[arg(long, default_value = "stresslab.toml")]
        config: PathBuf,

        /// Node role (overrides config and STRESSLAB_ROLE)
        #[arg(long)]
        role: Option<NodeType>,

        /// Listen address (overrides config and STRESSLAB_LISTEN)
        #[arg(long)]
        listen: Option<String>,

        /// Disable JSON report output
        #[arg(long)]
        no_report: bool,

        /// Disable colored output
        #[arg(long)]
        no_color: bool,
    },

    /// Parse and validate a config file without running anything
    Validate {
        /// Path to the TOML config file
        #[arg(long, default_value = "stresslab.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match cli.command {
        Commands::Run {
            config,
            role,
            listen,
            no_report,
            no_color,
        } => {
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(commands::run::execute_run(
                config, role, listen, no_report, no_color,
            ))
        },
        Commands::Validate { config } => commands::validate::execute(&config),
    }
}
