use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::error::ProvisionResult;
use crate::secrets::{ArtifactOutcome, SecretBootstrap};
use crate::ui;

pub struct SecretsPhase;

impl Phase for SecretsPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Secrets
    }

    fn is_done(&self, ctx: &PhaseContext<'_>) -> bool {
        SecretBootstrap::new(ctx.config, ctx.runner, ctx.prompter)
            .is_complete()
            .unwrap_or(false)
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let report = SecretBootstrap::new(ctx.config, ctx.runner, ctx.prompter).run()?;

        let mut created = 0;
        for a in &report.artifacts {
            let line = format!("{}: {} ({})", a.artifact, a.outcome, a.path.display());
            if a.outcome == ArtifactOutcome::AlreadyPresent {
                ui::print_info(&line);
            } else {
                created += 1;
                ui::print_success(&line);
            }
        }
        if report.key_propagated {
            ui::print_success(&format!(
                "Age public key written to {}",
                ctx.config.sops_config.display()
            ));
        }

        Ok(PhaseReport::new(format!("{created} artifact(s) created")))
    }
}
