use anyhow::Result;
use clap::Args;
use cluster_ops::SystemRunner;
use colored::Colorize;

use crate::config::PipelineConfig;
use crate::confirm::AutoAnswer;
use crate::phases::{phase, PhaseContext, PhaseId};
use crate::state::RunJournal;
use crate::ui;

/// Show which phases are already in place. Runs probes only.
#[derive(Args, Debug, Clone, Default)]
pub struct StatusCommand {}

/// Phases whose probe never reports done: they re-check live state every run.
fn always_runs(id: PhaseId) -> bool {
    !id.mutates()
}

impl StatusCommand {
    /// Print the status table.
    ///
    /// # Errors
    ///
    /// Never fails; probe errors read as pending.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        let runner = SystemRunner;
        let prompter = AutoAnswer(false);
        let ctx = PhaseContext::new(config, &runner, &prompter);

        ui::print_section("Phase Status");
        for id in PhaseId::ALL {
            let state = if always_runs(id) {
                "checks only".bright_black()
            } else if phase(id).is_done(&ctx) {
                "done".green()
            } else {
                "pending".yellow()
            };
            println!("  {:<15} {state}", id.as_str());
        }

        if let Some(journal) = RunJournal::peek(&config.state_dir) {
            println!();
            ui::print_kv("Last run", &journal.run_id);
            ui::print_kv("Updated", &journal.updated_at);
            if let Some((id, record)) = journal.last_entry() {
                ui::print_kv("Last phase", &format!("{id} ({})", record.status));
                if let Some(ref err) = record.last_error {
                    ui::print_warning(err);
                }
            }
        }
        Ok(0)
    }
}
