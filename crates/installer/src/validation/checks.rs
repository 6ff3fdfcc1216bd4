//! The preflight and deployment batteries.

use std::time::Duration;

use cluster_ops::net::{self, HttpProbe};
use cluster_ops::tunnel::{dns_cname, DnsRouting, LogScrapeTunnelStatus, TunnelStatusSource};
use cluster_ops::{mesh, CommandRunner, Kubectl, TunnelStatus};

use super::{Battery, Severity};
use crate::config::PipelineConfig;
use crate::inventory::{HostRegistry, CONTROL_PLANE};

/// Tools every run needs.
pub const REQUIRED_TOOLS: &[(&str, &str)] = &[
    ("ansible-playbook", "pipx install ansible-core"),
    ("ansible-vault", "pipx install ansible-core"),
    ("kubectl", "https://kubernetes.io/docs/tasks/tools/"),
    ("helm", "https://helm.sh/docs/intro/install/"),
    ("helmfile", "https://helmfile.readthedocs.io/en/latest/#installation"),
    ("sops", "https://github.com/getsops/sops/releases"),
    ("age-keygen", "Install age: https://github.com/FiloSottile/age#installation"),
    ("tailscale", "https://tailscale.com/download"),
];

pub const COREDNS_NAMESPACE: &str = "kube-system";
pub const COREDNS_DEPLOYMENT: &str = "coredns";

const SSH_PORT: u16 = 22;
const SSH_TIMEOUT: Duration = Duration::from_secs(3);
const HTTPS_TIMEOUT: Duration = Duration::from_secs(10);

fn tool_check<'a>(battery: &mut Battery<'a>, runner: &'a dyn CommandRunner, tool: &'a str, severity: Severity, hint: &str) {
    battery.add(tool, severity, hint, move || {
        runner
            .locate(tool)
            .map(|p| p.display().to_string())
            .ok_or_else(|| "not found on PATH".to_string())
    });
}

fn file_check<'a>(battery: &mut Battery<'a>, name: &str, path: &'a std::path::Path, severity: Severity, hint: &str) {
    battery.add(name, severity, hint, move || {
        if path.exists() {
            Ok(path.display().to_string())
        } else {
            Err(format!("{} does not exist", path.display()))
        }
    });
}

/// Checks that must hold before any phase changes anything.
#[must_use]
pub fn preflight<'a>(config: &'a PipelineConfig, runner: &'a dyn CommandRunner) -> Battery<'a> {
    let mut battery = Battery::new("preflight");

    for &(tool, hint) in REQUIRED_TOOLS {
        tool_check(&mut battery, runner, tool, Severity::Error, hint);
    }
    if config.tunnel.enabled {
        tool_check(
            &mut battery,
            runner,
            "cloudflared",
            Severity::Warning,
            "https://developers.cloudflare.com/cloudflare-one/connections/connect-networks/downloads/",
        );
    }
    tool_check(&mut battery, runner, "dig", Severity::Warning, "Install bind-utils / dnsutils");

    file_check(
        &mut battery,
        "SSH private key",
        &config.ssh_private_key,
        Severity::Error,
        "Create one with `ssh-keygen -t ed25519` and install it on every host",
    );

    // Secret bootstrap creates these, so their absence is only advisory.
    let bootstrap_hint = "Created by `hybrid secrets`";
    file_check(&mut battery, "Vault password file", &config.vault_password_file, Severity::Warning, bootstrap_hint);
    file_check(&mut battery, "Vault variable file", &config.vault_vars_file, Severity::Warning, bootstrap_hint);
    file_check(&mut battery, "Host registry", &config.inventory, Severity::Warning, bootstrap_hint);
    file_check(&mut battery, "Age key", &config.age_key_file, Severity::Warning, bootstrap_hint);

    battery.add(
        "Host registry lists a control-plane host",
        Severity::Error,
        format!("Add a host under [{CONTROL_PLANE}] in {}", config.inventory.display()),
        move || {
            if !config.inventory.exists() {
                return Ok("registry not created yet".to_string());
            }
            let registry = HostRegistry::load(&config.inventory).map_err(|e| e.to_string())?;
            let host = registry.resolve_first(CONTROL_PLANE).map_err(|e| e.to_string())?;
            Ok(format!("{} ({})", host.name, host.address))
        },
    );

    battery.add(
        "SSH reachable on inventory hosts",
        Severity::Warning,
        "Check the host addresses and firewalls; after the mesh phase hosts are reached over the mesh",
        move || {
            let Ok(registry) = HostRegistry::load(&config.inventory) else {
                return Ok("no hosts to check yet".to_string());
            };
            let hosts = registry.all_hosts();
            let unreachable: Vec<String> = hosts
                .iter()
                .filter(|h| {
                    let port = h
                        .attribute("ansible_port")
                        .and_then(|p| p.parse().ok())
                        .unwrap_or(SSH_PORT);
                    !net::tcp_reachable(&h.address, port, SSH_TIMEOUT)
                })
                .map(|h| format!("{} ({})", h.name, h.address))
                .collect();
            if unreachable.is_empty() {
                Ok(format!("{} host(s) reachable", hosts.len()))
            } else {
                Err(format!("unreachable: {}", unreachable.join(", ")))
            }
        },
    );

    battery.add(
        "Mesh client running",
        Severity::Warning,
        "Start it with `sudo tailscale up`",
        move || match mesh::status(runner) {
            Ok(status) if status.is_running() => Ok(format!("{} peer(s)", status.peers.len())),
            Ok(status) => Err(format!("backend state {}", status.backend_state)),
            Err(e) => Err(e.to_string()),
        },
    );

    battery
}

/// Live health of the deployed cluster.
#[must_use]
pub fn deployment<'a>(config: &'a PipelineConfig, runner: &'a dyn CommandRunner) -> Battery<'a> {
    let mut battery = Battery::new("deployment");
    let kubectl = move || Kubectl::new(runner, config.kubeconfig());

    battery.add(
        "Kubernetes API reachable",
        Severity::Error,
        "Check the kubeconfig and that the control plane is up",
        move || match kubectl().cluster_reachable() {
            Ok(true) => Ok("cluster-info answered".to_string()),
            Ok(false) => Err("kubectl cluster-info failed".to_string()),
            Err(e) => Err(e.to_string()),
        },
    );

    battery.add(
        "All nodes Ready",
        Severity::Error,
        "Inspect with `kubectl describe node <name>`",
        move || {
            let nodes = kubectl().nodes().map_err(|e| e.to_string())?;
            if nodes.is_empty() {
                return Err("no nodes registered".to_string());
            }
            let not_ready: Vec<&str> = nodes.iter().filter(|n| !n.ready).map(|n| n.name.as_str()).collect();
            if not_ready.is_empty() {
                Ok(format!("{} node(s) Ready", nodes.len()))
            } else {
                Err(format!("not Ready: {}", not_ready.join(", ")))
            }
        },
    );

    battery.add(
        "CoreDNS replicas ready",
        Severity::Error,
        "Inspect with `kubectl -n kube-system describe deployment coredns`",
        move || {
            let replicas = kubectl()
                .deployment_replicas(COREDNS_NAMESPACE, COREDNS_DEPLOYMENT)
                .map_err(|e| e.to_string())?;
            let summary = format!("{}/{} ready", replicas.ready, replicas.desired);
            if replicas.is_converged() {
                Ok(summary)
            } else {
                Err(summary)
            }
        },
    );

    for ns in &config.required_namespaces {
        battery.add(
            format!("Namespace {ns} healthy"),
            Severity::Error,
            format!("Inspect with `kubectl -n {ns} get pods`"),
            move || namespace_health(&kubectl(), ns),
        );
    }
    for ns in &config.optional_namespaces {
        battery.add(
            format!("Namespace {ns} healthy"),
            Severity::Warning,
            format!("Inspect with `kubectl -n {ns} get pods`"),
            move || namespace_health(&kubectl(), ns),
        );
    }

    if config.tunnel.enabled {
        let tunnel = &config.tunnel;
        battery.add(
            "Tunnel pods running",
            Severity::Warning,
            format!("Inspect with `kubectl -n {} get pods -l {}`", tunnel.namespace, tunnel.selector),
            move || namespace_health(&kubectl(), &tunnel.namespace),
        );

        battery.add(
            "Tunnel connection established",
            Severity::Warning,
            format!("Inspect with `kubectl -n {} logs -l {}`", tunnel.namespace, tunnel.selector),
            move || {
                let source = LogScrapeTunnelStatus::new(
                    runner,
                    config.kubeconfig(),
                    tunnel.namespace.as_str(),
                    tunnel.selector.as_str(),
                    tunnel.log_lines,
                );
                match source.connection_status().map_err(|e| e.to_string())? {
                    TunnelStatus::ConnectionEstablished { connections } => {
                        Ok(format!("{connections} connection(s) registered"))
                    }
                    TunnelStatus::NotYetConnected { detail } | TunnelStatus::Error { detail } => Err(detail),
                }
            },
        );

        for host in &tunnel.hostnames {
            battery.add(
                format!("DNS for {host} routes to the tunnel"),
                Severity::Warning,
                format!("Create a CNAME for {host} pointing at the tunnel"),
                move || match dns_cname(runner, host).map_err(|e| e.to_string())? {
                    DnsRouting::Tunnel(target) => Ok(target),
                    DnsRouting::Other(target) => Err(format!("CNAME points at {target}")),
                    DnsRouting::Missing => Err("no CNAME record".to_string()),
                },
            );
            battery.add(
                format!("https://{host} responds"),
                Severity::Warning,
                "Check the tunnel ingress rules and the backing service",
                move || match net::https_probe(host, HTTPS_TIMEOUT) {
                    HttpProbe::Reachable(code) => Ok(format!("HTTP {code}")),
                    HttpProbe::ServerError(code) => Err(format!("HTTP {code}")),
                    HttpProbe::Unreachable(e) => Err(e),
                },
            );
        }
    }

    battery.add(
        "No crash-looping pods",
        Severity::Warning,
        "Inspect with `kubectl logs --previous <pod>`",
        move || {
            let pods = kubectl().pods(None).map_err(|e| e.to_string())?;
            let looping: Vec<String> = pods
                .iter()
                .filter(|p| p.is_crash_looping())
                .map(|p| format!("{}/{}", p.namespace, p.name))
                .collect();
            if looping.is_empty() {
                Ok(format!("{} pod(s) checked", pods.len()))
            } else {
                Err(format!("CrashLoopBackOff: {}", looping.join(", ")))
            }
        },
    );

    battery
}

/// All pods in the namespace healthy, and at least one present.
///
/// # Errors
///
/// Returns a description of the unhealthy pods.
pub fn namespace_health(kubectl: &Kubectl<'_>, namespace: &str) -> Result<String, String> {
    let pods = kubectl.pods(Some(namespace)).map_err(|e| e.to_string())?;
    if pods.is_empty() {
        return Err(format!("no pods in {namespace}"));
    }
    let unhealthy: Vec<String> = pods
        .iter()
        .filter(|p| !p.is_healthy())
        .map(|p| match p.waiting_reason {
            Some(ref reason) => format!("{} ({reason})", p.name),
            None => format!("{} ({})", p.name, p.phase),
        })
        .collect();
    if unhealthy.is_empty() {
        Ok(format!("{} pod(s) healthy", pods.len()))
    } else {
        Err(format!("{}/{} unhealthy: {}", unhealthy.len(), pods.len(), unhealthy.join(", ")))
    }
}
