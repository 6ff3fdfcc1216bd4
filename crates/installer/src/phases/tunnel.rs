use cluster_ops::tunnel::{dns_cname, DnsRouting, LogScrapeTunnelStatus, TunnelStatusSource};
use cluster_ops::TunnelStatus;
use tracing::warn;

use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::config::ProbeBudget;
use crate::error::ProvisionResult;
use crate::probe::{poll_with_spinner, Observation, ProbeResult};

/// Checks that the ingress tunnel is connected and that each public
/// hostname routes through it. Advisory only: every problem is a warning.
pub struct TunnelPhase;

/// Poll a status source until the tunnel reports a connection.
///
/// A source reporting [`TunnelStatus::Error`] stops the wait at once; a
/// source that cannot be queried yet (pods still starting) keeps waiting.
pub fn wait_for_tunnel(source: &dyn TunnelStatusSource, budget: ProbeBudget) -> ProbeResult {
    poll_with_spinner("Waiting for the tunnel to connect", budget, || {
        match source.connection_status() {
            Ok(TunnelStatus::ConnectionEstablished { connections }) => Ok(Observation::ready(
                format!("{connections} connection(s) registered"),
            )),
            Ok(TunnelStatus::NotYetConnected { detail }) => Ok(Observation::Pending(detail)),
            Ok(TunnelStatus::Error { detail }) => Err(detail),
            Err(e) => Ok(Observation::pending(e.to_string())),
        }
    })
}

impl Phase for TunnelPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Tunnel
    }

    fn is_done(&self, _ctx: &PhaseContext<'_>) -> bool {
        false
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let tunnel = &ctx.config.tunnel;
        if !tunnel.enabled {
            return Ok(PhaseReport::new("tunnel disabled"));
        }

        let source = LogScrapeTunnelStatus::new(
            ctx.runner,
            ctx.config.kubeconfig(),
            tunnel.namespace.as_str(),
            tunnel.selector.as_str(),
            tunnel.log_lines,
        );
        let mut warnings = Vec::new();

        let probe = wait_for_tunnel(&source, ctx.config.probe.tunnel);
        if !probe.is_success() {
            warn!(outcome = %probe.outcome, detail = %probe.detail, "Tunnel not connected");
            warnings.push(format!("tunnel {}: {}", probe.outcome, probe.detail));
        }

        for host in &tunnel.hostnames {
            match dns_cname(ctx.runner, host) {
                Ok(DnsRouting::Tunnel(_)) => {}
                Ok(DnsRouting::Other(target)) => {
                    warnings.push(format!("{host} points at {target}, not the tunnel"));
                }
                Ok(DnsRouting::Missing) => warnings.push(format!("{host} has no CNAME record")),
                Err(e) => warnings.push(format!("{host}: DNS lookup failed: {e}")),
            }
        }

        let summary = if probe.is_success() {
            probe.detail
        } else {
            "tunnel not confirmed".to_string()
        };
        Ok(PhaseReport::new(summary).with_warnings(warnings))
    }
}
