use anyhow::Result;
use clap::Args;
use cluster_ops::SystemRunner;

use super::PromptArgs;
use crate::config::PipelineConfig;
use crate::orchestrator::{Pipeline, RunOptions};
use crate::phases::{PhaseContext, PhaseId};
use crate::ui;

/// Run the full provisioning pipeline.
#[derive(Args, Debug, Clone, Default)]
pub struct RunCommand {
    /// Resume at this phase; earlier phases are not looked at.
    #[arg(long, value_enum, value_name = "PHASE")]
    from: Option<PhaseId>,

    /// Re-run a phase even if it is already in place (repeatable).
    #[arg(long, value_enum, value_name = "PHASE")]
    force: Vec<PhaseId>,

    /// Leave out the tunnel phase.
    #[arg(long)]
    skip_tunnel: bool,

    #[command(flatten)]
    prompt: PromptArgs,
}

impl RunCommand {
    /// Run the pipeline.
    ///
    /// # Errors
    ///
    /// Returns an error if the run lock cannot be taken.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        ui::print_banner();

        let prompter = self.prompt.prompter();
        let runner = SystemRunner;
        let mut pipeline = Pipeline::new(PhaseContext::new(config, &runner, prompter.as_ref()))?;

        let outcome = pipeline.run(&RunOptions {
            from: self.from,
            only: None,
            force: self.force.clone(),
            skip_tunnel: self.skip_tunnel,
        });
        Ok(outcome.exit_code())
    }
}
