//! Validate command - run a check battery on its own.

use anyhow::{Context, Result};
use clap::Args;
use cluster_ops::SystemRunner;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::ui;
use crate::validation::checks;

/// Run the preflight or deployment checks.
#[derive(Args, Debug, Clone, Default)]
pub struct ValidateCommand {
    /// Check tools, credentials and host reachability.
    #[arg(long, conflicts_with = "deployment")]
    preflight: bool,

    /// Check the running cluster (the default).
    #[arg(long)]
    deployment: bool,

    /// Output report as JSON.
    #[arg(long)]
    json: bool,
}

impl ValidateCommand {
    /// Run the selected battery. Exits 1 only on error-severity failures.
    ///
    /// # Errors
    ///
    /// Returns an error if the report cannot be serialized.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        let runner = SystemRunner;
        let battery = if self.preflight && !self.deployment {
            checks::preflight(config, &runner)
        } else {
            checks::deployment(config, &runner)
        };
        info!(checks = battery.len(), "Running validation");
        debug!(names = ?battery.check_names(), "Checks");

        let report = battery.run();
        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&report).context("Failed to serialize report")?
            );
        } else {
            ui::print_section(&format!("Validation: {}", report.battery));
            report.print_results();
            report.print_summary();
        }

        Ok(report.exit_code())
    }
}
