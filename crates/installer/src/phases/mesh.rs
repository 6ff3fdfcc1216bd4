use std::convert::Infallible;

use cluster_ops::mesh::{self, is_mesh_address, MeshStatus};
use tracing::{debug, info, warn};

use super::{Phase, PhaseContext, PhaseId, PhaseReport};
use crate::error::ProvisionResult;
use crate::inventory::{set_host_attribute, HostRecord, HostRegistry, CONTROL_PLANE};
use crate::probe::{poll_with_spinner, Observation};

/// Joins every inventory host to the mesh, then points the inventory at the
/// mesh addresses.
pub struct MeshPhase;

/// Hosts that are not yet online peers.
fn offline<'h>(status: &MeshStatus, hosts: &'h [HostRecord]) -> Vec<&'h str> {
    hosts
        .iter()
        .filter(|h| !status.find(&h.name).is_some_and(|p| p.online))
        .map(|h| h.name.as_str())
        .collect()
}

impl Phase for MeshPhase {
    fn id(&self) -> PhaseId {
        PhaseId::Mesh
    }

    fn is_done(&self, ctx: &PhaseContext<'_>) -> bool {
        let Ok(registry) = HostRegistry::load(&ctx.config.inventory) else {
            return false;
        };
        let hosts = registry.all_hosts();
        if hosts.is_empty() {
            return false;
        }
        let status = match mesh::status(ctx.runner) {
            Ok(s) if s.is_running() => s,
            Ok(s) => {
                debug!(state = %s.backend_state, "Mesh client not running");
                return false;
            }
            Err(e) => {
                debug!(error = %e, "Mesh status unavailable");
                return false;
            }
        };

        let missing = offline(&status, &hosts);
        let unrewritten: Vec<&str> = hosts
            .iter()
            .filter(|h| !is_mesh_address(&h.address))
            .map(|h| h.name.as_str())
            .collect();
        debug!(?missing, ?unrewritten, "Mesh probe");
        missing.is_empty() && unrewritten.is_empty()
    }

    fn execute(&self, ctx: &PhaseContext<'_>) -> ProvisionResult<PhaseReport> {
        let config = ctx.config;
        let registry = HostRegistry::load(&config.inventory)?;
        registry.resolve_first(CONTROL_PLANE)?;
        let hosts = registry.all_hosts();

        ctx.run_playbook(&config.playbooks.mesh)?;

        poll_with_spinner("Waiting for hosts to join the mesh", config.probe.mesh_peers, || {
            Ok::<_, Infallible>(match mesh::status(ctx.runner) {
                Ok(status) => {
                    let missing = offline(&status, &hosts);
                    if missing.is_empty() {
                        Observation::ready(format!("{} host(s) online", hosts.len()))
                    } else {
                        Observation::pending(format!("offline: {}", missing.join(", ")))
                    }
                }
                Err(e) => Observation::pending(e.to_string()),
            })
        })
        .into_result("mesh peers")?;

        // The operator may have edited the file while we waited.
        let status = mesh::status(ctx.runner)?;
        let mut rewritten = 0;
        let mut warnings = Vec::new();
        for host in HostRegistry::load(&config.inventory)?.all_hosts() {
            if is_mesh_address(&host.address) {
                continue;
            }
            let Some(ip) = status.address_of(&host.name) else {
                warn!(host = %host.name, "Online but no IPv4 mesh address reported");
                warnings.push(format!("{} has no IPv4 mesh address", host.name));
                continue;
            };
            if set_host_attribute(&config.inventory, None, &host.name, host.address_key(), ip)? {
                info!(host = %host.name, from = %host.address, to = ip, "Switched host to mesh address");
                rewritten += 1;
            }
        }

        Ok(PhaseReport::new(format!(
            "{} host(s) on the mesh, {rewritten} inventory address(es) rewritten",
            hosts.len()
        ))
        .with_warnings(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PipelineConfig, ProbeBudget};
    use crate::confirm::AutoAnswer;
    use cluster_ops::{Invocation, MockCommandRunner, ToolOutput};

    const INVENTORY: &str = "\
[control-plane]
home-cp ansible_host=192.168.1.10

[workers]
vps-1 ansible_host=203.0.113.7 public=true
";

    const STATUS: &str = r#"{
      "BackendState": "Running",
      "Peer": {
        "a": {"HostName": "home-cp", "TailscaleIPs": ["100.101.1.1"], "Online": true},
        "b": {"HostName": "vps-1", "TailscaleIPs": ["100.101.1.2"], "Online": true}
      }
    }"#;

    fn config_with(dir: &std::path::Path, inventory: &str) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.resolve_paths(dir);
        config.probe.mesh_peers = ProbeBudget::new(2, 0);
        std::fs::create_dir_all(config.inventory.parent().unwrap()).unwrap();
        std::fs::write(&config.inventory, inventory).unwrap();
        config
    }

    fn mesh_runner() -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|inv: &Invocation| match inv.program.as_str() {
            "tailscale" => Ok(ToolOutput::ok(STATUS)),
            "ansible-playbook" => Ok(ToolOutput::ok("PLAY RECAP\nhome-cp : ok=5 failed=0")),
            other => panic!("unexpected {other}"),
        });
        runner
    }

    #[test]
    fn test_private_addresses_mean_not_done() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), INVENTORY);
        let runner = mesh_runner();
        let prompter = AutoAnswer(false);
        let ctx = PhaseContext::new(&config, &runner, &prompter);
        assert!(!MeshPhase.is_done(&ctx));
    }

    #[test]
    fn test_execute_rewrites_addresses_then_reports_done() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), INVENTORY);
        let runner = mesh_runner();
        let prompter = AutoAnswer(false);
        let ctx = PhaseContext::new(&config, &runner, &prompter);

        let report = MeshPhase.execute(&ctx).unwrap();
        assert!(report.warnings.is_empty());
        assert!(report.summary.contains("2 inventory address(es) rewritten"));

        let content = std::fs::read_to_string(&config.inventory).unwrap();
        assert!(content.contains("home-cp ansible_host=100.101.1.1"));
        assert!(content.contains("vps-1 ansible_host=100.101.1.2 public=true"));
        assert!(MeshPhase.is_done(&ctx));
    }

    #[test]
    fn test_offline_host_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_with(dir.path(), INVENTORY);
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|inv: &Invocation| match inv.program.as_str() {
            "tailscale" => Ok(ToolOutput::ok(
                r#"{"BackendState": "Running", "Peer": {"a": {"HostName": "home-cp", "TailscaleIPs": ["100.101.1.1"], "Online": true}}}"#,
            )),
            _ => Ok(ToolOutput::ok("")),
        });
        let prompter = AutoAnswer(false);
        let ctx = PhaseContext::new(&config, &runner, &prompter);

        let err = MeshPhase.execute(&ctx).unwrap_err();
        assert!(matches!(
            err,
            crate::error::ProvisionError::ConvergenceTimeout { attempts: 2, .. }
        ));
        assert_eq!(err.last_output(), Some("offline: vps-1"));
        // Nothing rewritten on failure.
        assert_eq!(std::fs::read_to_string(&config.inventory).unwrap(), INVENTORY);
    }
}
