//! Subcommand handlers. Each returns the process exit code.

pub mod hosts;
pub mod phase;
pub mod run;
pub mod secrets;
pub mod status;
pub mod validate;

use clap::Args;

use crate::confirm::{AutoAnswer, ConsolePrompter, Prompter};

/// How confirmation gates and edit pauses are answered.
#[derive(Args, Debug, Clone, Default)]
pub struct PromptArgs {
    /// Answer yes to every confirmation and skip edit pauses.
    #[arg(short, long, conflicts_with = "non_interactive")]
    pub yes: bool,

    /// Answer no to every confirmation; the run halts at the first gated
    /// phase with exit code 2.
    #[arg(long)]
    pub non_interactive: bool,
}

impl PromptArgs {
    #[must_use]
    pub fn prompter(&self) -> Box<dyn Prompter> {
        if self.yes {
            Box::new(AutoAnswer(true))
        } else if self.non_interactive {
            Box::new(AutoAnswer(false))
        } else {
            Box::new(ConsolePrompter::new())
        }
    }
}
