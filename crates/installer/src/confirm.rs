//! Operator confirmation gate.

use dialoguer::theme::ColorfulTheme;
use dialoguer::Input;
use tracing::{debug, warn};

/// Interaction with the operator at the two suspension points that need one:
/// yes/no gates and "edit this file, then continue" pauses.
#[cfg_attr(test, mockall::automock)]
pub trait Prompter {
    /// Ask a yes/no question. Only `y`/`yes` (any case) count as yes.
    fn confirm(&self, prompt: &str) -> bool;

    /// Block until the operator acknowledges `message`. Returns `false` when
    /// no acknowledgement could be read; the caller must not proceed.
    fn pause(&self, message: &str) -> bool;
}

/// Whether an answer counts as consent.
#[must_use]
pub fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Reads answers from the terminal.
#[derive(Default)]
pub struct ConsolePrompter {
    theme: ColorfulTheme,
}

impl ConsolePrompter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Prompter for ConsolePrompter {
    fn confirm(&self, prompt: &str) -> bool {
        let answer = Input::<String>::with_theme(&self.theme)
            .with_prompt(format!("{prompt} [y/N]"))
            .allow_empty(true)
            .interact_text();
        match answer {
            Ok(a) => {
                let accepted = parse_answer(&a);
                debug!(prompt, accepted, "Confirmation answered");
                accepted
            }
            Err(e) => {
                // No terminal (closed stdin, CI): treat as a refusal.
                warn!(error = %e, "Could not read confirmation; treating as no");
                false
            }
        }
    }

    fn pause(&self, message: &str) -> bool {
        let result = Input::<String>::with_theme(&self.theme)
            .with_prompt(format!("{message} (press Enter to continue)"))
            .allow_empty(true)
            .interact_text();
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Could not wait for operator; stopping here");
                false
            }
        }
    }
}

/// Answers every gate and pause with a fixed value without blocking.
///
/// `AutoAnswer(true)` backs `--yes`; `AutoAnswer(false)` backs
/// `--non-interactive`, where a pause means the run has to stop.
#[derive(Debug, Clone, Copy)]
pub struct AutoAnswer(pub bool);

impl Prompter for AutoAnswer {
    fn confirm(&self, prompt: &str) -> bool {
        debug!(prompt, answer = self.0, "Auto-answered confirmation");
        self.0
    }

    fn pause(&self, message: &str) -> bool {
        debug!(message, answer = self.0, "Auto-answered operator pause");
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_answer() {
        for yes in ["y", "Y", "yes", "YES", " Yes \n"] {
            assert!(parse_answer(yes), "{yes:?} should be accepted");
        }
        for no in ["", "n", "no", "yep", "ye", "sure", "y es"] {
            assert!(!parse_answer(no), "{no:?} should be refused");
        }
    }

    #[test]
    fn test_auto_answer() {
        assert!(AutoAnswer(true).confirm("Proceed?"));
        assert!(!AutoAnswer(false).confirm("Proceed?"));
        assert!(AutoAnswer(true).pause("Edit vars.yml"));
        assert!(!AutoAnswer(false).pause("Edit vars.yml"));
    }
}
