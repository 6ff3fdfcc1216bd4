//! Hybrid cluster provisioning CLI.
//!
//! Runs the provisioning pipeline (or any single phase of it) against the
//! project in the current directory. Every phase is idempotent: re-running
//! the same command skips whatever is already in place.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hybrid_cli::commands::hosts::HostsCommand;
use hybrid_cli::commands::phase::PhaseCommand;
use hybrid_cli::commands::run::RunCommand;
use hybrid_cli::commands::secrets::SecretsCommand;
use hybrid_cli::commands::status::StatusCommand;
use hybrid_cli::commands::validate::ValidateCommand;
use hybrid_cli::{ui, PipelineConfig, ProvisionError};

/// Hybrid home + cloud Kubernetes provisioning.
#[derive(Parser)]
#[command(
    name = "hybrid",
    version,
    about = "Provision a hybrid home/cloud Kubernetes cluster",
    long_about = "Provision a Kubernetes cluster with a control plane at home and\n\
                  public-IP workers, joined over a mesh VPN and exposed through an\n\
                  ingress tunnel.\n\n\
                  Without a subcommand the full pipeline runs. Exit codes: 0 success,\n\
                  1 failure, 2 halted waiting for operator confirmation."
)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (default: hybrid.yaml in the project root).
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Project directory every relative path resolves against.
    #[arg(long, global = true, value_name = "DIR")]
    project_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline.
    Run(RunCommand),

    /// Run a single phase.
    Phase(PhaseCommand),

    /// Run the preflight or deployment checks.
    Validate(ValidateCommand),

    /// Create missing secret artifacts.
    Secrets(SecretsCommand),

    /// Show which phases are already in place.
    Status(StatusCommand),

    /// Show hosts as the pipeline resolves them.
    Hosts(HostsCommand),
}

fn dispatch(cli: Cli) -> Result<i32> {
    let root = match cli.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to determine current directory")?,
    };
    let config = PipelineConfig::load(&root, cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        None => RunCommand::default().run(&config),
        Some(Commands::Run(cmd)) => cmd.run(&config),
        Some(Commands::Phase(cmd)) => cmd.run(&config),
        Some(Commands::Validate(cmd)) => cmd.run(&config),
        Some(Commands::Secrets(cmd)) => cmd.run(&config),
        Some(Commands::Status(cmd)) => cmd.run(&config),
        Some(Commands::Hosts(cmd)) => cmd.run(&config),
    }
}

fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("info,hybrid_cli=debug,cluster_ops=debug")
        } else {
            EnvFilter::new("warn,hybrid_cli=info,cluster_ops=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let code = match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            ui::print_error(&format!("{e:#}"));
            if let Some(hint) = e
                .downcast_ref::<ProvisionError>()
                .and_then(ProvisionError::remediation)
            {
                ui::print_info(&hint);
            }
            1
        }
    };
    std::process::exit(code);
}
