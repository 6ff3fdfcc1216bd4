use std::convert::Infallible;

use cluster_ops::{DiffStatus, Helmfile, Kubectl};
use tracing::{debug, warn};

use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::config::ProbeBudget;
use crate::error::ProvisionResult;
use crate::probe::{poll_with_spinner, Observation, ProbeResult};
use crate::validation::checks::{namespace_health, COREDNS_DEPLOYMENT, COREDNS_NAMESPACE};

/// Applies every chart release, then waits for the cluster services to
/// settle.
pub struct ServicesPhase;

fn wait_for_namespace(kubectl: &Kubectl<'_>, namespace: &str, budget: ProbeBudget) -> ProbeResult {
    poll_with_spinner(&format!("Waiting for pods in {namespace}"), budget, || {
        Ok::<_, Infallible>(match namespace_health(kubectl, namespace) {
            Ok(detail) => Observation::Ready(detail),
            Err(detail) => Observation::Pending(detail),
        })
    })
}

impl Phase for ServicesPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Services
    }

    fn is_done(&self, ctx: &PhaseContext<'_>) -> bool {
        let helmfile = Helmfile::new(ctx.runner, &ctx.config.helmfile, ctx.config.kubeconfig());
        match helmfile.diff() {
            Ok(DiffStatus::InSync) => true,
            Ok(DiffStatus::Pending(_)) => false,
            Err(e) => {
                debug!(error = %e, "helmfile diff failed");
                false
            }
        }
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let config = ctx.config;
        Helmfile::new(ctx.runner, &config.helmfile, config.kubeconfig()).apply()?;

        let kubectl = Kubectl::new(ctx.runner, config.kubeconfig());
        poll_with_spinner("Waiting for CoreDNS", config.probe.coredns, || {
            Ok::<_, Infallible>(
                match kubectl.deployment_replicas(COREDNS_NAMESPACE, COREDNS_DEPLOYMENT) {
                    Ok(r) if r.is_converged() => {
                        Observation::ready(format!("{}/{} replicas ready", r.ready, r.desired))
                    }
                    Ok(r) => Observation::pending(format!("{}/{} replicas ready", r.ready, r.desired)),
                    Err(e) => Observation::pending(e.to_string()),
                },
            )
        })
        .into_result("CoreDNS")?;

        for ns in &config.required_namespaces {
            wait_for_namespace(&kubectl, ns, config.probe.pod_ready)
                .into_result(&format!("namespace {ns}"))?;
        }

        let mut warnings = Vec::new();
        for ns in &config.optional_namespaces {
            let probe = wait_for_namespace(&kubectl, ns, config.probe.pod_ready);
            if !probe.is_success() {
                warn!(namespace = %ns, detail = %probe.detail, "Optional namespace not healthy");
                warnings.push(format!("namespace {ns}: {}", probe.detail));
            }
        }

        Ok(PhaseReport::new(format!(
            "releases applied, CoreDNS and {} required namespace(s) healthy",
            config.required_namespaces.len()
        ))
        .with_warnings(warnings))
    }
}
