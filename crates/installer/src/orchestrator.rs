//! Pipeline controller.
//!
//! Walks the phase list in order. For each phase it:
//! 1. skips it when its idempotency probe reports done (unless forced),
//! 2. asks for confirmation where required,
//! 3. runs the action and records the outcome in the run journal.
//!
//! The controller is the only place that decides between aborting and
//! continuing. There is no rollback: every probe is idempotent, so the
//! recovery path is simply to run again.

use tracing::{error, info, warn};

use crate::confirm::Prompter;
use crate::error::{ProvisionError, ProvisionResult};
use crate::lock::RunLock;
use crate::phases::{phase, Confirmation, Phase, PhaseContext, PhaseId};
use crate::state::{PhaseStatus, RunJournal};
use crate::ui;

/// Top-level gate asked before the first change of a run.
pub const PROCEED_PROMPT: &str = "Proceed with changes?";

/// Which phases to run and how.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Resume at this phase; earlier phases are not probed.
    pub from: Option<PhaseId>,
    /// Run exactly this phase.
    pub only: Option<PhaseId>,
    /// Run the action even when the probe reports done.
    pub force: Vec<PhaseId>,
    pub skip_tunnel: bool,
}

impl RunOptions {
    /// Selected phases in execution order.
    #[must_use]
    pub fn phases(&self) -> Vec<PhaseId> {
        if let Some(only) = self.only {
            return vec![only];
        }
        PhaseId::ALL
            .into_iter()
            .filter(|id| self.from.map_or(true, |from| *id >= from))
            .filter(|id| !(self.skip_tunnel && *id == PhaseId::Tunnel))
            .collect()
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum PipelineOutcome {
    Completed { warnings: Vec<String> },
    /// A confirmation gate was declined or could not be asked.
    AwaitingInput { phase: PhaseId },
    Aborted { phase: PhaseId, error: ProvisionError },
}

impl PipelineOutcome {
    /// `0` completed, `1` aborted, `2` awaiting operator input.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed { .. } => 0,
            Self::Aborted { .. } => 1,
            Self::AwaitingInput { .. } => 2,
        }
    }
}

enum Step {
    Finished(Vec<String>),
    Awaiting,
    Aborted(ProvisionError),
}

/// One run of the pipeline against a project.
pub struct Pipeline<'a> {
    ctx: PhaseContext<'a>,
    journal: RunJournal,
    proceed_confirmed: bool,
    _lock: RunLock,
}

impl<'a> Pipeline<'a> {
    /// Take the run lock and load the journal.
    ///
    /// # Errors
    ///
    /// Returns `Locked` if another run holds the lock.
    pub fn new(ctx: PhaseContext<'a>) -> ProvisionResult<Self> {
        let lock = RunLock::acquire(&ctx.config.state_dir)?;
        let journal = RunJournal::load_or_new(&ctx.config.state_dir);
        info!(run_id = %journal.run_id, "Starting pipeline run");
        Ok(Self {
            ctx,
            journal,
            proceed_confirmed: false,
            _lock: lock,
        })
    }

    #[must_use]
    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    /// Run the selected phases until done, halted or aborted.
    pub fn run(&mut self, options: &RunOptions) -> PipelineOutcome {
        let selected = options.phases();
        let mut warnings = Vec::new();

        for id in selected.iter().copied() {
            let forced = options.force.contains(&id);
            match self.run_phase(phase(id).as_ref(), forced) {
                Step::Finished(w) => warnings.extend(w.into_iter().map(|w| format!("{id}: {w}"))),
                Step::Awaiting => {
                    ui::print_warning(&format!("Halted before '{id}': waiting for confirmation"));
                    ui::print_info(&format!("Re-run `hybrid run --from {id}` when ready"));
                    return PipelineOutcome::AwaitingInput { phase: id };
                }
                Step::Aborted(error) => {
                    report_abort(id, &error);
                    return PipelineOutcome::Aborted { phase: id, error };
                }
            }
        }

        self.print_summary(&selected, &warnings);
        PipelineOutcome::Completed { warnings }
    }

    fn run_phase(&mut self, phase: &dyn Phase, forced: bool) -> Step {
        let id = phase.id();
        ui::print_progress_step(id.step_number(), PhaseId::TOTAL_STEPS, id.description());

        if forced {
            info!(phase = %id, "Forced re-run");
        } else if phase.is_done(&self.ctx) {
            info!(phase = %id, "Already in place");
            ui::print_success("Already in place, skipping");
            self.record(id, PhaseStatus::Skipped, None);
            return Step::Finished(Vec::new());
        }

        if !self.gate(id) {
            self.record(id, PhaseStatus::AwaitingInput, None);
            return Step::Awaiting;
        }

        info!(phase = %id, "Executing phase");
        match phase.execute(&self.ctx) {
            Ok(report) => {
                ui::print_success(&report.summary);
                for w in &report.warnings {
                    ui::print_warning(w);
                }
                let status = if report.warnings.is_empty() {
                    PhaseStatus::Done
                } else {
                    PhaseStatus::Warned
                };
                self.record(id, status, None);
                Step::Finished(report.warnings)
            }
            Err(e @ ProvisionError::AwaitingInput { .. }) => {
                warn!(phase = %id, error = %e, "Phase waiting for operator");
                ui::print_warning(&e.to_string());
                if let Some(next) = e.remediation() {
                    ui::print_info(&next);
                }
                self.record(id, PhaseStatus::AwaitingInput, Some(&e.to_string()));
                Step::Awaiting
            }
            Err(e) if id.confirmation() == Confirmation::WarnOnFailure => {
                warn!(phase = %id, error = %e, "Phase failed; continuing");
                ui::print_warning(&format!("{e}"));
                let message = e.to_string();
                self.record(id, PhaseStatus::Warned, Some(&message));
                Step::Finished(vec![message])
            }
            Err(e) => {
                error!(phase = %id, error = %e, "Phase failed");
                self.record(id, PhaseStatus::Aborted, Some(&e.to_string()));
                Step::Aborted(e)
            }
        }
    }

    /// Pre-confirm phases ask their own question. Any other phase that
    /// changes something needs the top-level go-ahead, asked at most once;
    /// an accepted pre-confirm gate also counts as that go-ahead.
    fn gate(&mut self, id: PhaseId) -> bool {
        let prompter: &dyn Prompter = self.ctx.prompter;
        let accepted = match id.confirmation() {
            Confirmation::PreConfirm => prompter.confirm(&id.gate_prompt()),
            _ if id.mutates() && !self.proceed_confirmed => prompter.confirm(PROCEED_PROMPT),
            _ => return true,
        };
        info!(phase = %id, accepted, "Confirmation gate");
        self.proceed_confirmed |= accepted;
        accepted
    }

    fn record(&mut self, id: PhaseId, status: PhaseStatus, error: Option<&str>) {
        if let Err(e) = self.journal.record(id, status, error) {
            warn!(error = %e, "Could not update run journal");
        }
    }

    fn print_summary(&self, selected: &[PhaseId], warnings: &[String]) {
        ui::print_section("Pipeline Complete");
        for id in selected {
            let status = self
                .journal
                .get(*id)
                .map_or_else(|| PhaseStatus::Pending.to_string(), |r| r.status.to_string());
            ui::print_kv(id.as_str(), &status);
        }
        if warnings.is_empty() {
            ui::print_success("No warnings");
        } else {
            println!();
            ui::print_warning(&format!("{} warning(s):", warnings.len()));
            for w in warnings {
                ui::print_list_item(w);
            }
        }
    }
}

/// Phase name, error, last tool output, remediation and the resume command.
fn report_abort(id: PhaseId, error: &ProvisionError) {
    ui::print_section(&format!("Phase '{id}' failed"));
    ui::print_error(&error.to_string());
    if let Some(tail) = error.last_output() {
        println!();
        ui::print_info("Last output:");
        ui::print_output_tail(tail);
    }
    println!();
    if let Some(hint) = error.remediation() {
        ui::print_info(&hint);
    }
    ui::print_info(&format!("Then resume with: hybrid run --from {id}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_selection() {
        let all = RunOptions::default().phases();
        assert_eq!(all, PhaseId::ALL);

        let from = RunOptions {
            from: Some(PhaseId::Services),
            ..RunOptions::default()
        };
        assert_eq!(
            from.phases(),
            [PhaseId::Services, PhaseId::Tunnel, PhaseId::Validate]
        );

        let skip = RunOptions {
            from: Some(PhaseId::Services),
            skip_tunnel: true,
            ..RunOptions::default()
        };
        assert_eq!(skip.phases(), [PhaseId::Services, PhaseId::Validate]);

        let only = RunOptions {
            only: Some(PhaseId::Mesh),
            from: Some(PhaseId::Secrets),
            ..RunOptions::default()
        };
        assert_eq!(only.phases(), [PhaseId::Mesh]);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(PipelineOutcome::Completed { warnings: vec![] }.exit_code(), 0);
        assert_eq!(
            PipelineOutcome::AwaitingInput {
                phase: PhaseId::Mesh
            }
            .exit_code(),
            2
        );
        assert_eq!(
            PipelineOutcome::Aborted {
                phase: PhaseId::Cluster,
                error: ProvisionError::PreconditionUnmet {
                    summary: "x".into()
                },
            }
            .exit_code(),
            1
        );
    }
}
