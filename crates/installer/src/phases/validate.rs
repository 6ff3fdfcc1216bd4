use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::error::{ProvisionError, ProvisionResult};
use crate::validation::{checks, CheckOutcome};

/// Runs the deployment battery against the live cluster.
pub struct ValidatePhase;

impl Phase for ValidatePhase {
    fn id(&self) -> PhaseId {
        PhaseId::Validate
    }

    fn is_done(&self, _ctx: &PhaseContext<'_>) -> bool {
        false
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let report = checks::deployment(ctx.config, ctx.runner).run();
        report.print_results();
        report.print_summary();

        if !report.is_success() {
            let detail = report
                .results
                .iter()
                .filter(|r| r.outcome == CheckOutcome::Fail)
                .map(|r| format!("{}: {}", r.name, r.message))
                .collect::<Vec<_>>()
                .join("\n");
            return Err(ProvisionError::ProbeFailed {
                resource: "deployment".to_string(),
                detail,
            });
        }

        let warnings = report
            .results
            .iter()
            .filter(|r| r.outcome == CheckOutcome::Warn)
            .map(|r| format!("{}: {}", r.name, r.message))
            .collect();
        let (passed, warned, _) = report.counts();
        Ok(PhaseReport::new(format!("{passed} check(s) passed, {warned} warning(s)"))
            .with_warnings(warnings))
    }
}
