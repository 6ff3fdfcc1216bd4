use std::convert::Infallible;

use cluster_ops::{Kubectl, NodeStatus};
use tracing::{debug, info};

use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::error::ProvisionResult;
use crate::inventory::{HostRecord, HostRegistry, CONTROL_PLANE, WORKERS};
use crate::probe::{poll_with_spinner, Observation};

/// Installs Kubernetes on the control plane and joins the workers.
pub struct ClusterPhase;

/// Control plane (required) and workers (optional) from the registry.
fn cluster_hosts(registry: &HostRegistry) -> ProvisionResult<Vec<HostRecord>> {
    let mut hosts = vec![registry.resolve_first(CONTROL_PLANE)?];
    match registry.resolve(WORKERS) {
        Ok(workers) => hosts.extend(workers),
        Err(e) => info!(error = %e, "No worker hosts; the cluster will be control-plane only"),
    }
    Ok(hosts)
}

fn is_node_for(node: &NodeStatus, host: &HostRecord) -> bool {
    node.name.eq_ignore_ascii_case(&host.name)
        || node.internal_ip.as_deref() == Some(host.address.as_str())
}

/// Hosts without a Ready node.
fn not_ready<'h>(nodes: &[NodeStatus], hosts: &'h [HostRecord]) -> Vec<&'h str> {
    hosts
        .iter()
        .filter(|h| !nodes.iter().any(|n| n.ready && is_node_for(n, h)))
        .map(|h| h.name.as_str())
        .collect()
}

impl Phase for ClusterPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Cluster
    }

    fn is_done(&self, ctx: &PhaseContext<'_>) -> bool {
        let Ok(hosts) = HostRegistry::load(&ctx.config.inventory).and_then(|r| cluster_hosts(&r))
        else {
            return false;
        };
        let kubectl = Kubectl::new(ctx.runner, ctx.config.kubeconfig());
        match kubectl.nodes() {
            Ok(nodes) => {
                let missing = not_ready(&nodes, &hosts);
                debug!(?missing, "Cluster probe");
                missing.is_empty()
            }
            Err(e) => {
                debug!(error = %e, "Node list unavailable");
                false
            }
        }
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let config = ctx.config;
        let hosts = cluster_hosts(&HostRegistry::load(&config.inventory)?)?;

        ctx.run_playbook(&config.playbooks.cluster)?;

        let kubectl = Kubectl::new(ctx.runner, config.kubeconfig());
        let probe = poll_with_spinner("Waiting for nodes to become Ready", config.probe.node_ready, || {
            Ok::<_, Infallible>(match kubectl.nodes() {
                Ok(nodes) => {
                    let missing = not_ready(&nodes, &hosts);
                    if missing.is_empty() {
                        Observation::ready(format!("{} node(s) Ready", nodes.len()))
                    } else {
                        Observation::pending(format!("not Ready: {}", missing.join(", ")))
                    }
                }
                Err(e) => Observation::pending(e.to_string()),
            })
        })
        .into_result("nodes")?;

        Ok(PhaseReport::new(probe.detail))
    }
}
