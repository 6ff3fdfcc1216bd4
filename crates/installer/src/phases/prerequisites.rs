use tracing::info;

use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::error::{ProvisionError, ProvisionResult};
use crate::validation::{checks, CheckOutcome};

/// Runs the preflight battery; error-severity failures stop the pipeline
/// before anything is changed.
pub struct PrerequisitesPhase;

impl Phase for PrerequisitesPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Prerequisites
    }

    fn is_done(&self, _ctx: &PhaseContext<'_>) -> bool {
        false
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let report = checks::preflight(ctx.config, ctx.runner).run();
        report.print_results();

        let (passed, warned, failed) = report.counts();
        info!(passed, warned, failed, "Preflight finished");

        if !report.is_success() {
            return Err(ProvisionError::PreconditionUnmet {
                summary: format!(
                    "{failed} check(s) failed: {}",
                    report.failures().join(", ")
                ),
            });
        }

        let warnings = report
            .results
            .iter()
            .filter(|r| r.outcome == CheckOutcome::Warn)
            .map(|r| format!("{}: {}", r.name, r.message))
            .collect();
        Ok(PhaseReport::new(format!("{passed} passed, {warned} warning(s)")).with_warnings(warnings))
    }
}
