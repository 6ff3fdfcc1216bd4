use anyhow::Result;
use clap::Args;
use cluster_ops::SystemRunner;

use super::PromptArgs;
use crate::config::PipelineConfig;
use crate::orchestrator::{Pipeline, RunOptions};
use crate::phases::{PhaseContext, PhaseId};

/// Run a single phase: probe, gate, action.
#[derive(Args, Debug, Clone)]
pub struct PhaseCommand {
    /// Phase to run.
    #[arg(value_enum)]
    phase: PhaseId,

    /// Run the action even if the phase is already in place.
    #[arg(long)]
    force: bool,

    #[command(flatten)]
    prompt: PromptArgs,
}

impl PhaseCommand {
    /// Run the phase.
    ///
    /// # Errors
    ///
    /// Returns an error if the run lock cannot be taken.
    pub fn run(&self, config: &PipelineConfig) -> Result<i32> {
        let prompter = self.prompt.prompter();
        let runner = SystemRunner;
        let mut pipeline = Pipeline::new(PhaseContext::new(config, &runner, prompter.as_ref()))?;

        let outcome = pipeline.run(&RunOptions {
            only: Some(self.phase),
            force: if self.force { vec![self.phase] } else { Vec::new() },
            ..RunOptions::default()
        });
        Ok(outcome.exit_code())
    }
}
